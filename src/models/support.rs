use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

text_enum!(
    TicketStatus {
        Open => "open",
        InProgress => "in_progress",
        Resolved => "resolved",
        Closed => "closed",
    }
);

text_enum!(
    TicketPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SupportTicket {
    pub id: i64,
    pub user_id: i64,
    pub user_email: Option<String>,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SupportTicket {
    pub async fn create(
        pool: &PgPool,
        user_id: i64,
        subject: &str,
        description: &str,
        priority: TicketPriority,
    ) -> Result<SupportTicket, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            WITH inserted AS (
                INSERT INTO support_tickets (user_id, subject, description, priority)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            )
            SELECT i.id, i.user_id, p.email AS user_email, i.subject, i.description,
                   i.status, i.priority, i.created_at, i.updated_at
            FROM inserted i
            LEFT JOIN profiles p ON p.id = i.user_id
            "#,
        )
        .bind(user_id)
        .bind(subject)
        .bind(description)
        .bind(priority.as_str())
        .fetch_one(pool)
        .await
    }

    /// Newest first; `None` lists every status.
    pub async fn list(pool: &PgPool, status: Option<TicketStatus>) -> Result<Vec<SupportTicket>, sqlx::Error> {
        sqlx::query_as::<_, SupportTicket>(
            r#"
            SELECT t.id, t.user_id, p.email AS user_email, t.subject, t.description,
                   t.status, t.priority, t.created_at, t.updated_at
            FROM support_tickets t
            LEFT JOIN profiles p ON p.id = t.user_id
            WHERE $1::text IS NULL OR t.status = $1
            ORDER BY t.created_at DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await
    }

    pub async fn set_status(pool: &PgPool, ticket_id: i64, status: TicketStatus) -> Result<bool, sqlx::Error> {
        sqlx::query("UPDATE support_tickets SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(ticket_id)
            .bind(status.as_str())
            .execute(pool)
            .await
            .map(|r| r.rows_affected() > 0)
    }
}
