//! Contact groups owned by a user, and their resolution into recipients.

use crate::db::{self, datetime_to_i64, i64_to_datetime, new_id, rewrite_sql, DbKind};
use crate::error::AppError;
use crate::types::Recipient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupContact {
    pub id: String,
    pub group_id: String,
    pub name: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub company: String,
    pub website: String,
}

impl GroupContact {
    pub fn to_recipient(&self) -> Recipient {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Recipient {
            name: self.name.clone(),
            first_name: opt(&self.first_name),
            last_name: opt(&self.last_name),
            phone: self.phone.clone(),
            email: opt(&self.email),
            company: opt(&self.company),
            website: opt(&self.website),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub contacts: Vec<GroupContact>,
}

fn group_from_row(row: &AnyRow) -> Result<Group, AppError> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(Group {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: i64_to_datetime(created_at),
        contacts: Vec::new(),
    })
}

fn contact_from_row(row: &AnyRow) -> Result<GroupContact, AppError> {
    Ok(GroupContact {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        name: db::optional_text(row, "name")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        company: row.try_get("company")?,
        website: row.try_get("website")?,
    })
}

async fn find_owned(pool: &AnyPool, kind: DbKind, user_id: &str, group_id: &str) -> Result<Group, AppError> {
    let sql = rewrite_sql(
        "SELECT id, user_id, name, description, created_at FROM groups WHERE id = ? AND user_id = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Group"))?;
    group_from_row(&row)
}

pub async fn list_contacts(pool: &AnyPool, kind: DbKind, group_id: &str) -> Result<Vec<GroupContact>, AppError> {
    let sql = rewrite_sql(
        r#"SELECT id, group_id, name, first_name, last_name, phone, email, company, website
           FROM group_contacts WHERE group_id = ? ORDER BY position ASC"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).bind(group_id).fetch_all(pool).await?;
    rows.iter().map(contact_from_row).collect()
}

async fn next_position(pool: &AnyPool, kind: DbKind, group_id: &str) -> Result<i64, AppError> {
    let sql = rewrite_sql(
        "SELECT COALESCE(MAX(position), -1) AS pos FROM group_contacts WHERE group_id = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref()).bind(group_id).fetch_one(pool).await?;
    Ok(row.try_get::<i64, _>("pos")? + 1)
}

async fn contact_exists(pool: &AnyPool, kind: DbKind, group_id: &str, phone: &str) -> Result<bool, AppError> {
    let sql = rewrite_sql(
        "SELECT 1 FROM group_contacts WHERE group_id = ? AND phone = ? LIMIT 1",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(group_id)
        .bind(phone)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

async fn insert_contact(
    pool: &AnyPool,
    kind: DbKind,
    group_id: &str,
    position: i64,
    input: &Recipient,
) -> Result<GroupContact, AppError> {
    let contact = GroupContact {
        id: new_id(),
        group_id: group_id.to_string(),
        name: input.name.clone(),
        first_name: input.first_name.clone().unwrap_or_default(),
        last_name: input.last_name.clone().unwrap_or_default(),
        phone: input.phone.clone(),
        email: input.email.clone().unwrap_or_default(),
        company: input.company.clone().unwrap_or_default(),
        website: input.website.clone().unwrap_or_default(),
    };
    let sql = rewrite_sql(
        r#"INSERT INTO group_contacts (
            id, group_id, position, name, first_name, last_name, phone, email, company, website
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&contact.id)
        .bind(&contact.group_id)
        .bind(position)
        .bind(contact.name.as_deref().unwrap_or_default())
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.phone)
        .bind(&contact.email)
        .bind(&contact.company)
        .bind(&contact.website)
        .execute(pool)
        .await?;
    Ok(contact)
}

/// Inserts contacts whose phone is not yet in the group; returns the ones added.
async fn insert_new_contacts(
    pool: &AnyPool,
    kind: DbKind,
    group_id: &str,
    contacts: &[Recipient],
) -> Result<Vec<GroupContact>, AppError> {
    let mut position = next_position(pool, kind, group_id).await?;
    let mut added = Vec::new();
    for input in contacts {
        if input.phone.trim().is_empty() {
            tracing::debug!("skipping contact without phone in group {group_id}");
            continue;
        }
        if contact_exists(pool, kind, group_id, &input.phone).await? {
            tracing::info!("contact with phone {} already exists in group {group_id}", input.phone);
            continue;
        }
        added.push(insert_contact(pool, kind, group_id, position, input).await?);
        position += 1;
    }
    Ok(added)
}

pub async fn create_group(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
    name: &str,
    description: Option<&str>,
    contacts: &[Recipient],
) -> Result<Group, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::validation("Group name is required"));
    }
    if contacts.is_empty() {
        return Err(AppError::validation("At least one contact is required"));
    }

    let group_id = new_id();
    let sql = rewrite_sql(
        "INSERT INTO groups (id, user_id, name, description, created_at) VALUES (?, ?, ?, ?, ?)",
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&group_id)
        .bind(user_id)
        .bind(name)
        .bind(description.unwrap_or_default())
        .bind(datetime_to_i64(Utc::now()))
        .execute(pool)
        .await?;

    insert_new_contacts(pool, kind, &group_id, contacts).await?;
    get_group(pool, kind, user_id, &group_id).await
}

/// A user's groups with their contacts, newest first.
pub async fn list_groups(pool: &AnyPool, kind: DbKind, user_id: &str) -> Result<Vec<Group>, AppError> {
    let sql = rewrite_sql(
        r#"SELECT id, user_id, name, description, created_at
           FROM groups WHERE user_id = ? ORDER BY created_at DESC, id DESC"#,
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).bind(user_id).fetch_all(pool).await?;
    let mut groups = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut group = group_from_row(row)?;
        group.contacts = list_contacts(pool, kind, &group.id).await?;
        groups.push(group);
    }
    Ok(groups)
}

pub async fn get_group(pool: &AnyPool, kind: DbKind, user_id: &str, group_id: &str) -> Result<Group, AppError> {
    let mut group = find_owned(pool, kind, user_id, group_id).await?;
    group.contacts = list_contacts(pool, kind, group_id).await?;
    Ok(group)
}

pub async fn update_group(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
    group_id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<Group, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::validation("Group name is required"));
    }
    let existing = find_owned(pool, kind, user_id, group_id).await?;
    let sql = rewrite_sql("UPDATE groups SET name = ?, description = ? WHERE id = ?", kind);
    sqlx::query(sql.as_ref())
        .bind(name)
        .bind(description.unwrap_or(&existing.description))
        .bind(group_id)
        .execute(pool)
        .await?;
    get_group(pool, kind, user_id, group_id).await
}

pub async fn delete_group(pool: &AnyPool, kind: DbKind, user_id: &str, group_id: &str) -> Result<(), AppError> {
    find_owned(pool, kind, user_id, group_id).await?;

    let mut tx = pool.begin().await?;
    let sql = rewrite_sql("DELETE FROM group_contacts WHERE group_id = ?", kind);
    sqlx::query(sql.as_ref()).bind(group_id).execute(&mut *tx).await?;
    let sql = rewrite_sql("DELETE FROM groups WHERE id = ?", kind);
    sqlx::query(sql.as_ref()).bind(group_id).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn add_contacts(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
    group_id: &str,
    contacts: &[Recipient],
) -> Result<Vec<GroupContact>, AppError> {
    if contacts.is_empty() {
        return Err(AppError::validation("At least one contact is required"));
    }
    find_owned(pool, kind, user_id, group_id).await?;
    insert_new_contacts(pool, kind, group_id, contacts).await
}

pub async fn remove_contact(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
    group_id: &str,
    contact_id: &str,
) -> Result<GroupContact, AppError> {
    find_owned(pool, kind, user_id, group_id).await?;

    let sql = rewrite_sql(
        r#"SELECT id, group_id, name, first_name, last_name, phone, email, company, website
           FROM group_contacts WHERE id = ? AND group_id = ?"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(contact_id)
        .bind(group_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Contact"))?;
    let contact = contact_from_row(&row)?;

    let sql = rewrite_sql("DELETE FROM group_contacts WHERE id = ?", kind);
    sqlx::query(sql.as_ref()).bind(contact_id).execute(pool).await?;
    Ok(contact)
}

/// The group and its members as recipients, in stored order. An empty member
/// list is returned as-is; callers decide whether that is an error.
pub async fn resolve_group(
    pool: &AnyPool,
    kind: DbKind,
    user_id: &str,
    group_id: &str,
) -> Result<(Group, Vec<Recipient>), AppError> {
    let group = get_group(pool, kind, user_id, group_id).await?;
    let recipients = group.contacts.iter().map(GroupContact::to_recipient).collect();
    Ok((group, recipients))
}
