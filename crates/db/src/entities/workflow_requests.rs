//! `SeaORM` Entity for workflow_requests table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "workflow_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: String,
    pub title: String,
    pub request_type: String,
    pub status: String,
    pub priority: String,
    pub payload: Json,
    pub current_step: i32,
    pub due_date: Option<Date>,
    pub version: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::approval_steps::Entity")]
    ApprovalSteps,
    #[sea_orm(has_many = "super::timeline_entries::Entity")]
    TimelineEntries,
}

impl Related<super::approval_steps::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApprovalSteps.def()
    }
}

impl Related<super::timeline_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TimelineEntries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
