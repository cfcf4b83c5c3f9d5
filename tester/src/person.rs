use std::sync::{Arc, OnceLock};

use chrono::NaiveDate;
use common::{
    Entity, FieldKind, Instance, ObjectRef, SerializationError, TypeDescriptor, Value,
};
use rand::Rng;

const NAMES: &[&str] = &["Ada", "Grace", "Edsger", "Barbara", "Ken", "Frances"];

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub friends: Vec<String>,
}

impl Person {
    pub fn random(rng: &mut impl Rng) -> Self {
        let name = NAMES[rng.gen_range(0..NAMES.len())].to_string();
        let date_of_birth = if rng.gen_bool(0.8) {
            NaiveDate::from_ymd_opt(rng.gen_range(1800..2020), rng.gen_range(1..=12), rng.gen_range(1..=28))
        } else {
            None
        };
        let friends = (0..rng.gen_range(0..4))
            .map(|_| NAMES[rng.gen_range(0..NAMES.len())].to_string())
            .collect();

        Self {
            name,
            date_of_birth,
            friends,
        }
    }

    pub fn greeting(&self) -> String {
        format!("Welcome, {}", self.name)
    }
}

impl Entity for Person {
    fn descriptor() -> Arc<TypeDescriptor> {
        static DESCRIPTOR: OnceLock<Arc<TypeDescriptor>> = OnceLock::new();
        DESCRIPTOR
            .get_or_init(|| {
                Arc::new(
                    TypeDescriptor::builder("tester.Person")
                        .field("name", FieldKind::Text)
                        .field("date_of_birth", FieldKind::Date)
                        .field("friends", FieldKind::Reference)
                        .build(),
                )
            })
            .clone()
    }

    fn to_fields(&self) -> Vec<Value> {
        let friends: Vec<Value> = self.friends.iter().map(|name| name.as_str().into()).collect();
        vec![
            self.name.clone().into(),
            self.date_of_birth.into(),
            Value::list(friends),
        ]
    }

    fn from_instance(instance: &Instance) -> Result<Self, SerializationError> {
        let friends = match instance.get_ref("friends")? {
            Some(list) => friend_names(&list)?,
            None => Vec::new(),
        };

        Ok(Self {
            name: instance.get_text("name")?.unwrap_or_default().to_string(),
            date_of_birth: instance.get_date("date_of_birth")?,
            friends,
        })
    }
}

fn friend_names(list: &ObjectRef) -> Result<Vec<String>, SerializationError> {
    let object = list.lock();
    let values = object
        .as_list()
        .ok_or_else(|| SerializationError::TypeConflict("friends is not a list".to_string()))?;

    Ok(values
        .iter()
        .filter_map(|value| value.as_text().map(str::to_string))
        .collect())
}
