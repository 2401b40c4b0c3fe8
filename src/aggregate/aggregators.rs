use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde_json::{Map, Value, json};

use crate::aggregate::accumulators::{
    Accumulator, DistinctAccumulator, FrequencySetAccumulator, MaxAccumulator, MinAccumulator,
    SetAccumulator, SetOfDictAccumulator, SingleValueAccumulator, SortableValue, SumAccumulator,
    UniqueValueCountAccumulator,
};
use crate::domain::EntityType;
use crate::fields::{FieldType, FieldTypes};
use crate::transform::shape::field_types;

type Accumulators = BTreeMap<String, Option<Box<dyn Accumulator>>>;

/// Folds the inner entities of one type, collected from every contribution
/// to an outer entity, into a handful of facet-ready summaries.
pub trait EntityAggregator {
    /// Rewrites an inner entity before its fields are accumulated.
    fn transform_entity(&self, entity: &Value) -> Value {
        entity.clone()
    }

    /// Entities with equal keys are folded together. `None` folds
    /// everything into a single summary.
    fn group_key(&self, _entity: &Value) -> Option<Value> {
        None
    }

    /// `None` drops the field from the summary.
    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        default_accumulator(field, max_set_size)
    }

    fn aggregate(&self, entities: &[&Value], max_set_size: usize) -> Vec<Value> {
        let mut groups: BTreeMap<SortableValue, Accumulators> = BTreeMap::new();
        for entity in entities {
            let entity = self.transform_entity(entity);
            let Value::Object(fields) = &entity else {
                continue;
            };
            let key = SortableValue(self.group_key(&entity).unwrap_or(Value::Null));
            let group = groups.entry(key).or_default();
            for (field, value) in fields {
                let accumulator = group
                    .entry(field.clone())
                    .or_insert_with(|| self.accumulator(field, max_set_size));
                if let Some(accumulator) = accumulator {
                    accumulator.accumulate(value);
                }
            }
        }
        groups
            .into_values()
            .map(|group| {
                Value::Object(
                    group
                        .into_iter()
                        .filter_map(|(field, accumulator)| {
                            accumulator.map(|accumulator| (field, accumulator.get()))
                        })
                        .collect::<Map<_, _>>(),
                )
            })
            .collect()
    }
}

/// Declared types of inner entity fields, by field name. The first
/// declaration of a name wins.
static DECLARED_TYPES: LazyLock<BTreeMap<String, FieldType>> = LazyLock::new(|| {
    fn flatten(types: &FieldTypes, declared: &mut BTreeMap<String, FieldType>) {
        if let FieldTypes::Nested(fields) = types {
            for (name, field_type) in fields {
                match field_type {
                    FieldTypes::Leaf(field_type) => {
                        declared.entry(name.clone()).or_insert(*field_type);
                    }
                    nested => flatten(nested, declared),
                }
            }
        }
    }
    let mut declared = BTreeMap::new();
    flatten(&field_types(EntityType::Projects), &mut declared);
    declared
});

/// Numeric fields are summed, structured fields are deduplicated by content
/// and everything else is collected into a set. The choice follows the
/// field's declared type so that it does not depend on which value arrives
/// first.
fn default_accumulator(field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
    Some(match DECLARED_TYPES.get(field) {
        Some(FieldType::NullInt | FieldType::NullFloat) => Box::new(SumAccumulator::new()),
        Some(FieldType::ValueAndUnit | FieldType::ClosedRange | FieldType::PassThrough) => {
            Box::new(SetOfDictAccumulator::new(&[], max_set_size))
        }
        _ => Box::new(SetAccumulator::new(max_set_size)),
    })
}

fn single() -> Option<Box<dyn Accumulator>> {
    Some(Box::new(SingleValueAccumulator::new()))
}

fn set(max_set_size: usize) -> Option<Box<dyn Accumulator>> {
    Some(Box::new(SetAccumulator::new(max_set_size)))
}

fn distinct_sum() -> Option<Box<dyn Accumulator>> {
    Some(Box::new(DistinctAccumulator::new(SumAccumulator::new())))
}

fn field<'a>(entity: &'a Value, name: &str) -> &'a Value {
    entity.get(name).unwrap_or(&Value::Null)
}

pub struct SimpleAggregator;

impl EntityAggregator for SimpleAggregator {}

/// Files are grouped into one summary per kind of file, with counts and
/// sizes over the distinct files of that kind.
pub struct FileAggregator;

impl EntityAggregator for FileAggregator {
    fn transform_entity(&self, entity: &Value) -> Value {
        let key = json!([field(entity, "uuid"), field(entity, "version")]);
        json!({
            "format": field(entity, "format"),
            "file_source": field(entity, "file_source"),
            "is_intermediate": field(entity, "is_intermediate"),
            "content_description": field(entity, "content_description"),
            "count": [key, 1],
            "size": [key, field(entity, "size")],
            "matrix_cell_count": [key, field(entity, "matrix_cell_count")],
        })
    }

    fn group_key(&self, entity: &Value) -> Option<Value> {
        Some(json!([
            field(entity, "format"),
            field(entity, "file_source"),
            field(entity, "is_intermediate"),
            field(entity, "content_description"),
        ]))
    }

    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "count" | "size" | "matrix_cell_count" => distinct_sum(),
            "format" | "file_source" | "is_intermediate" | "content_description" => single(),
            _ => set(max_set_size),
        }
    }
}

/// Cell counts per organ. Each suspension is counted once even when it
/// shows up in several contributions.
pub struct CellSuspensionAggregator;

impl EntityAggregator for CellSuspensionAggregator {
    fn transform_entity(&self, entity: &Value) -> Value {
        let id = field(entity, "document_id");
        let mut transformed = entity.clone();
        if let Some(object) = transformed.as_object_mut() {
            for count in ["total_estimated_cells", "total_estimated_cells_redundant"] {
                let value = field(entity, count).clone();
                object.insert(count.to_string(), json!([id, value]));
            }
            object.remove("document_id");
            object.remove("biomaterial_id");
        }
        transformed
    }

    fn group_key(&self, entity: &Value) -> Option<Value> {
        Some(field(entity, "organ").clone())
    }

    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "total_estimated_cells" | "total_estimated_cells_redundant" => distinct_sum(),
            "organ" => single(),
            _ => set(max_set_size),
        }
    }
}

pub struct DonorAggregator;

impl EntityAggregator for DonorAggregator {
    fn transform_entity(&self, entity: &Value) -> Value {
        let mut transformed = entity.clone();
        if let Some(object) = transformed.as_object_mut() {
            object.insert(
                "donor_count".to_string(),
                field(entity, "biomaterial_id").clone(),
            );
        }
        transformed
    }

    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "donor_count" => Some(Box::new(UniqueValueCountAccumulator::new())),
            "organism_age" => Some(Box::new(SetOfDictAccumulator::new(
                &["value", "unit"],
                max_set_size,
            ))),
            "organism_age_range" => Some(Box::new(SetOfDictAccumulator::new(
                &["gte", "lte"],
                max_set_size,
            ))),
            _ => set(max_set_size),
        }
    }
}

/// One summary per kind of sample.
pub struct SampleAggregator;

impl EntityAggregator for SampleAggregator {
    fn group_key(&self, entity: &Value) -> Option<Value> {
        Some(field(entity, "entity_type").clone())
    }

    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "entity_type" => single(),
            _ => set(max_set_size),
        }
    }
}

/// Free-text and nested project fields are too large to aggregate.
pub struct ProjectAggregator;

impl EntityAggregator for ProjectAggregator {
    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "project_description" | "contributors" | "publications" | "supplementary_links" => {
                None
            }
            _ => default_accumulator(field, max_set_size),
        }
    }
}

pub struct ProtocolAggregator;

impl EntityAggregator for ProtocolAggregator {
    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "assay_type" => Some(Box::new(FrequencySetAccumulator::new(max_set_size))),
            _ => set(max_set_size),
        }
    }
}

pub struct SequencingProcessAggregator;

impl EntityAggregator for SequencingProcessAggregator {}

/// Counts the distinct sequencing inputs of each type.
pub struct SequencingInputAggregator;

impl EntityAggregator for SequencingInputAggregator {
    fn transform_entity(&self, entity: &Value) -> Value {
        json!({
            "sequencing_input_type": field(entity, "sequencing_input_type"),
            "biomaterial_id": field(entity, "biomaterial_id"),
            "count": field(entity, "document_id"),
        })
    }

    fn group_key(&self, entity: &Value) -> Option<Value> {
        Some(field(entity, "sequencing_input_type").clone())
    }

    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "count" => Some(Box::new(UniqueValueCountAccumulator::new())),
            "sequencing_input_type" => single(),
            _ => set(max_set_size),
        }
    }
}

/// Matrices are listed individually, once per file version.
pub struct MatricesAggregator;

impl EntityAggregator for MatricesAggregator {
    fn aggregate(&self, entities: &[&Value], max_set_size: usize) -> Vec<Value> {
        let mut matrices = SetOfDictAccumulator::new(&["uuid", "version"], max_set_size);
        for entity in entities {
            let file = field(entity, "file");
            let mut keyed = (*entity).clone();
            if let Some(object) = keyed.as_object_mut() {
                object.insert("uuid".to_string(), field(file, "uuid").clone());
                object.insert("version".to_string(), field(file, "version").clone());
            }
            matrices.accumulate(&keyed);
        }
        match matrices.get() {
            Value::Array(matrices) => matrices,
            _ => Vec::new(),
        }
    }
}

pub struct DateAggregator;

impl EntityAggregator for DateAggregator {
    fn accumulator(&self, field: &str, max_set_size: usize) -> Option<Box<dyn Accumulator>> {
        match field {
            "submission_date" | "aggregate_submission_date" => {
                Some(Box::new(MinAccumulator::new()))
            }
            "update_date"
            | "last_modified_date"
            | "aggregate_update_date"
            | "aggregate_last_modified_date" => Some(Box::new(MaxAccumulator::new())),
            _ => set(max_set_size),
        }
    }
}

/// The aggregator for an inner entity type in documents of the given outer
/// type. `None` means the inner entities are kept as they are, which is the
/// case for an outer entity's own inner entry.
pub fn aggregator(
    entity_type: EntityType,
    inner_type: &str,
) -> Option<&'static dyn EntityAggregator> {
    if inner_type == entity_type.as_str() {
        return None;
    }
    Some(match inner_type {
        "files" => &FileAggregator,
        "samples" => &SampleAggregator,
        "cell_suspensions" => &CellSuspensionAggregator,
        "donors" => &DonorAggregator,
        "projects" => &ProjectAggregator,
        "protocols" => &ProtocolAggregator,
        "sequencing_processes" => &SequencingProcessAggregator,
        "sequencing_inputs" => &SequencingInputAggregator,
        "matrices" | "contributed_analyses" => &MatricesAggregator,
        "dates" => &DateAggregator,
        _ => &SimpleAggregator,
    })
}
