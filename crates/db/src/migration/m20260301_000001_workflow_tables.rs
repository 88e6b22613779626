//! Creates `workflow_requests`, `approval_steps` and `timeline_entries`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(WorkflowRequests::TenantId).uuid().not_null())
                    .col(
                        ColumnDef::new(WorkflowRequests::RequesterId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRequests::RequesterName)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowRequests::Title).string().not_null())
                    .col(
                        ColumnDef::new(WorkflowRequests::RequestType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRequests::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRequests::Priority)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowRequests::Payload).json().not_null())
                    .col(
                        ColumnDef::new(WorkflowRequests::CurrentStep)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WorkflowRequests::DueDate).date().null())
                    .col(
                        ColumnDef::new(WorkflowRequests::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(WorkflowRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_requests_status")
                    .table(WorkflowRequests::Table)
                    .col(WorkflowRequests::Status)
                    .col(WorkflowRequests::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ApprovalSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApprovalSteps::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApprovalSteps::RequestId).uuid().not_null())
                    .col(ColumnDef::new(ApprovalSteps::Position).integer().not_null())
                    .col(ColumnDef::new(ApprovalSteps::StepOrder).integer().not_null())
                    .col(ColumnDef::new(ApprovalSteps::ApproverRole).string().null())
                    .col(ColumnDef::new(ApprovalSteps::ApproverId).uuid().null())
                    .col(ColumnDef::new(ApprovalSteps::ApproverName).string().null())
                    .col(
                        ColumnDef::new(ApprovalSteps::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ApprovalSteps::ExecutionMode)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ApprovalSteps::TimeoutHours).integer().null())
                    .col(ColumnDef::new(ApprovalSteps::EscalateTo).uuid().null())
                    .col(ColumnDef::new(ApprovalSteps::EscalateToName).string().null())
                    .col(ColumnDef::new(ApprovalSteps::Comments).text().null())
                    .col(
                        ColumnDef::new(ApprovalSteps::ActionDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ApprovalSteps::ActedBy).uuid().null())
                    .col(
                        ColumnDef::new(ApprovalSteps::BecamePendingAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ApprovalSteps::OriginalApproverRole)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(ApprovalSteps::OriginalApproverId).uuid().null())
                    .col(
                        ColumnDef::new(ApprovalSteps::OriginalApproverName)
                            .string()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_approval_steps_request")
                            .from(ApprovalSteps::Table, ApprovalSteps::RequestId)
                            .to(WorkflowRequests::Table, WorkflowRequests::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_approval_steps_request")
                    .table(ApprovalSteps::Table)
                    .col(ApprovalSteps::RequestId)
                    .col(ApprovalSteps::Position)
                    .to_owned(),
            )
            .await?;

        // Approver history lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_approval_steps_approver")
                    .table(ApprovalSteps::Table)
                    .col(ApprovalSteps::ApproverId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TimelineEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TimelineEntries::Sequence)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TimelineEntries::Id)
                            .uuid()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(TimelineEntries::RequestId).uuid().not_null())
                    .col(
                        ColumnDef::new(TimelineEntries::Action)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(TimelineEntries::ActorId).uuid().null())
                    .col(ColumnDef::new(TimelineEntries::ActorName).string().not_null())
                    .col(ColumnDef::new(TimelineEntries::StepId).uuid().null())
                    .col(ColumnDef::new(TimelineEntries::FromStatus).string_len(32).null())
                    .col(
                        ColumnDef::new(TimelineEntries::ToStatus)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(TimelineEntries::Details).text().null())
                    .col(
                        ColumnDef::new(TimelineEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_timeline_entries_request")
                            .from(TimelineEntries::Table, TimelineEntries::RequestId)
                            .to(WorkflowRequests::Table, WorkflowRequests::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_timeline_entries_request")
                    .table(TimelineEntries::Table)
                    .col(TimelineEntries::RequestId)
                    .col(TimelineEntries::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TimelineEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ApprovalSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowRequests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowRequests {
    Table,
    Id,
    TenantId,
    RequesterId,
    RequesterName,
    Title,
    RequestType,
    Status,
    Priority,
    Payload,
    CurrentStep,
    DueDate,
    Version,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ApprovalSteps {
    Table,
    Id,
    RequestId,
    Position,
    StepOrder,
    ApproverRole,
    ApproverId,
    ApproverName,
    Status,
    ExecutionMode,
    TimeoutHours,
    EscalateTo,
    EscalateToName,
    Comments,
    ActionDate,
    ActedBy,
    BecamePendingAt,
    OriginalApproverRole,
    OriginalApproverId,
    OriginalApproverName,
}

#[derive(DeriveIden)]
enum TimelineEntries {
    Table,
    Sequence,
    Id,
    RequestId,
    Action,
    ActorId,
    ActorName,
    StepId,
    FromStatus,
    ToStatus,
    Details,
    CreatedAt,
}
