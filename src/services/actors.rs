use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::user;
use crate::errors::ServiceError;

/// A user named either by id or by full name.
///
/// Strings that parse as UUIDs are ids; anything else is a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActorRef {
    Id(Uuid),
    Name(String),
}

/// Turns actor references into user ids before any transaction starts.
pub struct ActorResolver {
    db_pool: Arc<DatabaseConnection>,
}

impl ActorResolver {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    pub async fn resolve(&self, actor: &ActorRef) -> Result<Uuid, ServiceError> {
        match actor {
            ActorRef::Id(id) => Ok(*id),
            ActorRef::Name(name) => user::Entity::find()
                .filter(user::Column::FullName.eq(name.as_str()))
                .one(&*self.db_pool)
                .await
                .map_err(ServiceError::db_error)?
                .map(|u| u.id)
                .ok_or_else(|| ServiceError::NotFound(format!("User '{}'", name))),
        }
    }

    pub async fn resolve_optional(
        &self,
        actor: Option<&ActorRef>,
    ) -> Result<Option<Uuid>, ServiceError> {
        match actor {
            Some(actor) => self.resolve(actor).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_strings_deserialize_as_ids() {
        let id = Uuid::new_v4();
        let actor: ActorRef = serde_json::from_value(serde_json::json!(id.to_string())).unwrap();
        assert_eq!(actor, ActorRef::Id(id));

        let actor: ActorRef = serde_json::from_value(serde_json::json!("Ana Ruiz")).unwrap();
        assert_eq!(actor, ActorRef::Name("Ana Ruiz".into()));
    }
}
