//! Syncable entities and their create/patch inputs.
//!
//! Entities are never physically removed: `deleted_at` set means tombstone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseTagError;

/// Which table a delta targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Category,
    Activity,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Activity => "activity",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" => Ok(EntityKind::Category),
            "activity" => Ok(EntityKind::Activity),
            other => Err(ParseTagError {
                kind: "entity kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A user-defined grouping for activities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
pub struct Category {
    pub id: String,
    #[serde(alias = "user_id")]
    pub owner: String,
    pub name: String,
    pub color: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Category {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A single logged activity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
pub struct Activity {
    pub id: String,
    #[serde(alias = "user_id")]
    pub owner: String,
    pub category_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub app_version: String,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub score: Option<f64>,
    /// Opaque client metadata, usually a JSON document.
    pub metadata: Option<String>,
    pub deleted_at: Option<i64>,
}

impl Activity {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields supplied when creating a category.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// Fields supplied when logging an activity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewActivity {
    pub category_id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: Option<String>,
}

/// Partial update of a category.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub color: Option<Option<String>>,
}

impl CategoryPatch {
    pub fn apply_to(&self, category: &mut Category) {
        if let Some(name) = &self.name {
            category.name = name.clone();
        }
        if let Some(color) = &self.color {
            category.color = color.clone();
        }
    }
}

/// Partial update of an activity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActivityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub amount: Option<Option<f64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub score: Option<Option<f64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub lat: Option<Option<f64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub lng: Option<Option<f64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub metadata: Option<Option<String>>,
}

impl ActivityPatch {
    pub fn apply_to(&self, activity: &mut Activity) {
        if let Some(category_id) = &self.category_id {
            activity.category_id = category_id.clone();
        }
        if let Some(description) = &self.description {
            activity.description = description.clone();
        }
        if let Some(amount) = self.amount {
            activity.amount = amount;
        }
        if let Some(score) = self.score {
            activity.score = score;
        }
        if let Some(lat) = self.lat {
            activity.lat = lat;
        }
        if let Some(lng) = self.lng {
            activity.lng = lng;
        }
        if let Some(metadata) = &self.metadata {
            activity.metadata = metadata.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_category() -> Category {
        Category {
            id: "c1".into(),
            owner: "yak".into(),
            name: "Running".into(),
            color: Some("#FF0000".into()),
            created_at: 100,
            updated_at: 100,
            deleted_at: None,
        }
    }

    #[test]
    fn test_entity_kind_round_trip() {
        for kind in [EntityKind::Category, EntityKind::Activity] {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
        assert!("todo".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_category_accepts_legacy_user_id() {
        let json = r#"{"id":"c1","user_id":"yak","name":"Gym","color":null,
                       "created_at":1,"updated_at":2,"deleted_at":null}"#;
        let category: Category = serde_json::from_str(json).expect("parse");
        assert_eq!(category.owner, "yak");
        assert!(!category.is_deleted());
    }

    #[test]
    fn test_category_missing_optionals_default_to_none() {
        let json = r#"{"id":"c1","owner":"yak","name":"Gym","created_at":1,"updated_at":2}"#;
        let category: Category = serde_json::from_str(json).expect("parse");
        assert_eq!(category.color, None);
        assert_eq!(category.deleted_at, None);
    }

    #[test]
    fn test_category_patch_distinguishes_absent_and_null() {
        let mut category = sample_category();

        let keep: CategoryPatch = serde_json::from_str(r#"{"name":"Swim"}"#).expect("parse");
        keep.apply_to(&mut category);
        assert_eq!(category.name, "Swim");
        assert_eq!(category.color.as_deref(), Some("#FF0000"));

        let clear: CategoryPatch = serde_json::from_str(r#"{"color":null}"#).expect("parse");
        clear.apply_to(&mut category);
        assert_eq!(category.color, None);
    }

    #[test]
    fn test_activity_patch_keeps_zero_values() {
        let mut activity = Activity {
            id: "a1".into(),
            owner: "yak".into(),
            category_id: "c1".into(),
            created_at: 1,
            updated_at: 1,
            lat: None,
            lng: None,
            app_version: "1.0.0".into(),
            description: None,
            amount: Some(3.0),
            score: None,
            metadata: None,
            deleted_at: None,
        };
        let patch: ActivityPatch =
            serde_json::from_str(r#"{"amount":0.0,"lat":0.0}"#).expect("parse");
        patch.apply_to(&mut activity);
        assert_eq!(activity.amount, Some(0.0));
        assert_eq!(activity.lat, Some(0.0));
        assert_eq!(activity.category_id, "c1");
    }
}
