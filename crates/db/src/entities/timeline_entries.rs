//! `SeaORM` Entity for timeline_entries table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "timeline_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub sequence: i64,
    #[sea_orm(unique)]
    pub id: Uuid,
    pub request_id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_name: String,
    pub step_id: Option<Uuid>,
    pub from_status: Option<String>,
    pub to_status: String,
    pub details: Option<String>,
    pub created_at: DateTimeWithTimeZone,
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
