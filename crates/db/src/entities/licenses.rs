//! `SeaORM` Entity for licenses table.
//!
//! Only the lock target and ledger version live here; the license itself is
//! owned by the surrounding application.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "licenses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub ledger_version: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::time_credits::Entity")]
    TimeCredits,
    #[sea_orm(has_many = "super::time_expenditures::Entity")]
    TimeExpenditures,
}

impl Related<super::time_credits::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TimeCredits.def()
    }
}

impl Related<super::time_expenditures::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TimeExpenditures.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
