//! `SeaORM` Entity for time_credits table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "time_credits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub license_id: Uuid,
    pub start_date: Date,
    pub end_date: Date,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub credit_hours: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub remaining_hours: Decimal,
    pub version: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::licenses::Entity",
        from = "Column::LicenseId",
        to = "super::licenses::Column::Id"
    )]
    Licenses,
    #[sea_orm(has_many = "super::time_deductions::Entity")]
    TimeDeductions,
}

impl Related<super::licenses::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Licenses.def()
    }
}

impl Related<super::time_deductions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TimeDeductions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
