use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

text_enum!(
    /// Access level stored on the profile.
    UserRole {
        Admin => "admin",
        AgencyAdmin => "agency_admin",
        Customer => "customer",
    }
);

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Profile {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROFILE_COLUMNS: &str =
    "id, email, password_hash, full_name, phone_number, role, created_at, updated_at";

impl Profile {
    pub fn role(&self) -> UserRole {
        // The CHECK constraint keeps unexpected values out; fall back to the least privilege
        self.role.parse().unwrap_or(UserRole::Customer)
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles WHERE lower(email) = lower($1)",
            PROFILE_COLUMNS
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!("SELECT {} FROM profiles WHERE id = $1", PROFILE_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Returns `None` when the email is already registered.
    pub async fn create(
        pool: &PgPool,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "INSERT INTO profiles (email, password_hash, full_name, phone_number, role)
             VALUES ($1, $2, $3, $4, 'customer')
             ON CONFLICT (email) DO NOTHING
             RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .bind(phone_number)
        .fetch_optional(pool)
        .await
    }

    pub async fn update_contact(
        pool: &PgPool,
        id: i64,
        full_name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "UPDATE profiles
             SET full_name = COALESCE($2, full_name),
                 phone_number = COALESCE($3, phone_number),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .bind(full_name)
        .bind(phone_number)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_role(pool: &PgPool, id: i64, role: UserRole) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "UPDATE profiles SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(pool)
        .await
    }
}
