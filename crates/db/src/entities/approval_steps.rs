//! `SeaORM` Entity for approval_steps table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "approval_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub request_id: Uuid,
    /// Index within the request's chain.
    pub position: i32,
    pub step_order: i32,
    pub approver_role: Option<String>,
    pub approver_id: Option<Uuid>,
    pub approver_name: Option<String>,
    pub status: String,
    pub execution_mode: String,
    pub timeout_hours: Option<i32>,
    pub escalate_to: Option<Uuid>,
    pub escalate_to_name: Option<String>,
    pub comments: Option<String>,
    pub action_date: Option<DateTimeWithTimeZone>,
    pub acted_by: Option<Uuid>,
    pub became_pending_at: Option<DateTimeWithTimeZone>,
    /// Assignment before escalation; restored when the chain restarts.
    pub original_approver_role: Option<String>,
    pub original_approver_id: Option<Uuid>,
    pub original_approver_name: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::workflow_requests::Entity",
        from = "Column::RequestId",
        to = "super::workflow_requests::Column::Id",
        on_delete = "Cascade"
    )]
    WorkflowRequests,
}

impl Related<super::workflow_requests::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WorkflowRequests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
