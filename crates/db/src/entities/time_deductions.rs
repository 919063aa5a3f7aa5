//! `SeaORM` Entity for time_deductions table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "time_deductions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub credit_id: Uuid,
    pub expenditure_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub hours_deducted: Decimal,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::time_credits::Entity",
        from = "Column::CreditId",
        to = "super::time_credits::Column::Id"
    )]
    TimeCredits,
    #[sea_orm(
        belongs_to = "super::time_expenditures::Entity",
        from = "Column::ExpenditureId",
        to = "super::time_expenditures::Column::Id"
    )]
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
