use nods::db::{self, DbKind};
use nods::groups;
use nods::types::Recipient;
use nods::AppError;
use sqlx::AnyPool;
use tempfile::TempDir;

async fn create_test_pool(dir: &TempDir) -> (AnyPool, DbKind) {
    sqlx::any::install_default_drivers();
    let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let pool = AnyPool::connect(&db_url).await.unwrap();
    db::init_db(&pool, DbKind::Sqlite).await.unwrap();
    (pool, DbKind::Sqlite)
}

fn contact(name: &str, phone: &str) -> Recipient {
    Recipient {
        name: Some(name.to_string()),
        phone: phone.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_and_resolve_preserves_order() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;

    let contacts = vec![
        contact("Cy", "+15550000003"),
        contact("Ann", "+15550000001"),
        contact("Bob", "+15550000002"),
    ];
    let group = groups::create_group(&pool, kind, "u1", "Team", Some("work"), &contacts)
        .await
        .unwrap();
    assert_eq!(group.name, "Team");
    assert_eq!(group.description, "work");
    assert_eq!(group.contacts.len(), 3);

    let (resolved, recipients) = groups::resolve_group(&pool, kind, "u1", &group.id).await.unwrap();
    assert_eq!(resolved.id, group.id);
    let names: Vec<_> = recipients.iter().filter_map(|r| r.name.as_deref()).collect();
    assert_eq!(names, vec!["Cy", "Ann", "Bob"]);
    assert_eq!(recipients[1].first_name, None);
}

#[tokio::test]
async fn test_create_requires_name_and_contacts() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;

    let err = groups::create_group(&pool, kind, "u1", " ", None, &[contact("Ann", "+1")])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = groups::create_group(&pool, kind, "u1", "Team", None, &[]).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_group_not_owned_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let group = groups::create_group(&pool, kind, "u1", "Team", None, &[contact("Ann", "+1")])
        .await
        .unwrap();

    let err = groups::resolve_group(&pool, kind, "u2", &group.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("Group")));
    let err = groups::resolve_group(&pool, kind, "u1", "missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("Group")));
    let err = groups::delete_group(&pool, kind, "u2", &group.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("Group")));
}

#[tokio::test]
async fn test_add_contacts_skips_duplicates() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let group = groups::create_group(&pool, kind, "u1", "Team", None, &[contact("Ann", "+15550000001")])
        .await
        .unwrap();

    let added = groups::add_contacts(
        &pool,
        kind,
        "u1",
        &group.id,
        &[
            contact("Ann again", "+15550000001"),
            contact("Bob", "+15550000002"),
            contact("Nobody", ""),
        ],
    )
    .await
    .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].phone, "+15550000002");

    let group = groups::get_group(&pool, kind, "u1", &group.id).await.unwrap();
    let phones: Vec<_> = group.contacts.iter().map(|c| c.phone.as_str()).collect();
    assert_eq!(phones, vec!["+15550000001", "+15550000002"]);
}

#[tokio::test]
async fn test_remove_contact_and_empty_group() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let group = groups::create_group(&pool, kind, "u1", "Team", None, &[contact("Ann", "+1")])
        .await
        .unwrap();
    let contact_id = group.contacts[0].id.clone();

    let removed = groups::remove_contact(&pool, kind, "u1", &group.id, &contact_id).await.unwrap();
    assert_eq!(removed.phone, "+1");

    let err = groups::remove_contact(&pool, kind, "u1", &group.id, &contact_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound("Contact")));

    let (_, recipients) = groups::resolve_group(&pool, kind, "u1", &group.id).await.unwrap();
    assert!(recipients.is_empty());
}

#[tokio::test]
async fn test_update_and_delete_cascade() {
    let dir = TempDir::new().unwrap();
    let (pool, kind) = create_test_pool(&dir).await;
    let group = groups::create_group(
        &pool,
        kind,
        "u1",
        "Team",
        Some("old"),
        &[contact("Ann", "+1"), contact("Bob", "+2")],
    )
    .await
    .unwrap();

    let updated = groups::update_group(&pool, kind, "u1", &group.id, "Crew", None).await.unwrap();
    assert_eq!(updated.name, "Crew");
    assert_eq!(updated.description, "old");

    let err = groups::update_group(&pool, kind, "u1", &group.id, "", None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    groups::create_group(&pool, kind, "u1", "Other", None, &[contact("Cy", "+3")])
        .await
        .unwrap();
    assert_eq!(groups::list_groups(&pool, kind, "u1").await.unwrap().len(), 2);

    groups::delete_group(&pool, kind, "u1", &group.id).await.unwrap();
    let remaining = groups::list_groups(&pool, kind, "u1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "Other");

    let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_contacts WHERE group_id = ?")
        .bind(&group.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(orphans, 0);
}
