use std::sync::Arc;

use chrono::NaiveDate;
use oncoflow_memory::{JsonFileBackend, PatientStore, PersistenceBackend};
use oncoflow_schema::{EventKind, Patient, TimelineEvent};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn sample(id: u64, name: &str, stage: Option<&str>) -> Patient {
    Patient {
        id,
        name: name.into(),
        diagnosis: "Adenocarcinoma de recto".into(),
        stage: stage.map(str::to_string),
        clinical_notes: "Recibe TNT".into(),
        timeline: vec![
            TimelineEvent::new(date(2024, 6, 1), EventKind::Cirugia, "Resección anterior"),
            TimelineEvent::new(date(2024, 2, 1), EventKind::parse_label("Radioterapia"), "RT corta"),
            TimelineEvent::new(date(2024, 1, 5), EventKind::Imagenes, ""),
        ],
        last_visit: date(2024, 6, 1),
    }
}

#[tokio::test]
async fn missing_file_loads_empty_collection() {
    let temp = tempfile::TempDir::new().unwrap();
    let backend = JsonFileBackend::new(&temp.path().join("data"));
    assert!(backend.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn persisted_collection_reloads_equal() {
    let temp = tempfile::TempDir::new().unwrap();
    let data_dir = temp.path().join("data");

    let store = PatientStore::open(Arc::new(JsonFileBackend::new(&data_dir)))
        .await
        .unwrap();
    store.insert_front(sample(10, "Ana", Some("IIIB"))).await.unwrap();
    store.insert_front(sample(11, "", None)).await.unwrap();

    let reopened = PatientStore::open(Arc::new(JsonFileBackend::new(&data_dir)))
        .await
        .unwrap();
    assert_eq!(*reopened.snapshot(), *store.snapshot());
    assert_eq!(reopened.snapshot()[0].id, 11);
}

#[tokio::test]
async fn file_is_keyed_and_fully_rewritten() {
    let temp = tempfile::TempDir::new().unwrap();
    let backend = JsonFileBackend::new(temp.path());
    assert!(backend.path().ends_with("oncoflow_data.json"));

    backend.save(&[sample(1, "Ana", None), sample(2, "Luis", None)]).await.unwrap();
    backend.save(&[sample(3, "Eva", None)]).await.unwrap();

    let loaded = backend.load().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, 3);
    assert!(!temp.path().join("oncoflow_data.json.tmp").exists());
}

#[tokio::test]
async fn corrupt_file_is_a_load_error() {
    let temp = tempfile::TempDir::new().unwrap();
    std::fs::write(temp.path().join("oncoflow_data.json"), "{not json").unwrap();

    let backend = JsonFileBackend::new(temp.path());
    let err = backend.load().await.unwrap_err();
    assert!(err.to_string().contains("failed to load patient collection"));
}

#[tokio::test]
async fn stores_sharing_a_directory_keep_each_others_commits() {
    let temp = tempfile::TempDir::new().unwrap();
    let first = PatientStore::open(Arc::new(JsonFileBackend::new(temp.path())))
        .await
        .unwrap();
    let second = PatientStore::open(Arc::new(JsonFileBackend::new(temp.path())))
        .await
        .unwrap();

    first.insert_front(sample(1, "Ana", None)).await.unwrap();
    second.insert_front(sample(2, "Luis", None)).await.unwrap();
    let updated = second
        .update(1, |p| p.clinical_notes = "Control anual".into())
        .await
        .unwrap();
    assert_eq!(updated.name, "Ana");

    let reopened = PatientStore::open(Arc::new(JsonFileBackend::new(temp.path())))
        .await
        .unwrap();
    let ids: Vec<_> = reopened.snapshot().iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert_eq!(reopened.get(1).unwrap().clinical_notes, "Control anual");
}

#[tokio::test]
async fn stale_store_does_not_reuse_taken_id() {
    let temp = tempfile::TempDir::new().unwrap();
    let first = PatientStore::open(Arc::new(JsonFileBackend::new(temp.path())))
        .await
        .unwrap();
    let second = PatientStore::open(Arc::new(JsonFileBackend::new(temp.path())))
        .await
        .unwrap();

    first.insert_front(sample(7, "Ana", None)).await.unwrap();
    let err = second.insert_front(sample(7, "Luis", None)).await.unwrap_err();
    assert!(err.to_string().contains("already in use"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_lock_excludes_other_writers_until_dropped() {
    let temp = tempfile::TempDir::new().unwrap();
    let holder = JsonFileBackend::new(temp.path());
    let held = holder.lock().await.unwrap();
    assert!(temp.path().join("oncoflow_data.lock").exists());

    let dir = temp.path().to_path_buf();
    let waiter = tokio::spawn(async move {
        let store = PatientStore::open(Arc::new(JsonFileBackend::new(&dir)))
            .await
            .unwrap();
        store.insert_front(sample(3, "Eva", None)).await.unwrap();
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());
    assert!(holder.load().await.unwrap().is_empty());

    drop(held);
    tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(holder.load().await.unwrap().len(), 1);
}
