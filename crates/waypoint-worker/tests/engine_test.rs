//! End-to-end engine tests against in-memory repository and blob store.

mod helpers;

use helpers::{MemoryRepository, MemoryStore};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use waypoint_core::models::{CropConfig, ProcessingJob, ProcessingStatus};
use waypoint_core::{ImagingRepository, PipelineError};
use waypoint_processing::OutputFormat;
use waypoint_storage::keys;
use waypoint_worker::{EngineConfig, ProcessingEngine};

fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
    let mut img = RgbImage::new(width, height);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8]);
    }
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

fn test_engine(
    repo: Arc<MemoryRepository>,
    store: Arc<MemoryStore>,
) -> ProcessingEngine {
    let config = EngineConfig {
        worker_count: 2,
        recovery_settle_delay: Duration::from_millis(20),
        ..Default::default()
    };
    ProcessingEngine::new(repo, store, config)
}

async fn wait_for_job(
    repo: &MemoryRepository,
    job_id: Uuid,
    wanted: ProcessingStatus,
) -> ProcessingJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        if let Some(job) = repo.job(job_id) {
            if job.status == wanted {
                return job;
            }
            assert!(
                !(job.status.is_terminal() && job.status != wanted),
                "job reached terminal status {:?} while waiting for {:?} (last_error: {:?})",
                job.status,
                wanted,
                job.last_error
            );
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job {job_id} to reach {wanted:?}"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_gallery_upload() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let user = Uuid::new_v4();
    let staging = keys::staging_key(user, "gallery", 1700000000, Uuid::new_v4(), "jpg");
    store.set_object(&staging, jpeg_fixture(2048, 1536), "image/jpeg");

    let engine = test_engine(repo.clone(), store.clone());
    let job_id = engine
        .queue_processing(&staging, "gallery", user, None)
        .await
        .unwrap();

    let job = wait_for_job(&repo, job_id, ProcessingStatus::Ready).await;
    let asset = repo
        .get_asset_by_id(job.asset_id.unwrap())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(asset.status, ProcessingStatus::Ready);
    assert!(asset.processed_at.is_some());
    assert!(!asset.has_alpha);
    assert_eq!(asset.version, 1);
    assert_eq!(asset.original_width, 2048);

    // Full gallery ladder, three formats each, no PNG for an opaque source.
    let mut renditions: Vec<String> = asset
        .derivatives
        .iter()
        .map(|d| d.rendition_name.clone())
        .collect();
    renditions.sort();
    renditions.dedup();
    assert_eq!(
        renditions,
        vec![
            "gallery_1200",
            "gallery_1920",
            "gallery_320",
            "gallery_640",
            "gallery_960",
            "gallery_thumb"
        ]
    );
    assert_eq!(asset.derivatives.len(), 18);
    assert!(asset.derivatives.iter().all(|d| d.format != "png"));

    // Every row's key is the deterministic derivative key, and the object
    // actually exists in the store.
    for d in &asset.derivatives {
        assert_eq!(
            d.storage_key,
            keys::derivative_key(&asset.content_hash, 1, &d.rendition_name, &d.format)
        );
        assert!(store.has_object(&d.storage_key));
    }

    // Original moved from staging to its canonical key.
    assert!(!store.has_object(&staging));
    assert!(store.has_object(&keys::original_key(&asset.content_hash)));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_upload_reuses_asset_and_deletes_staging() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let data = jpeg_fixture(640, 480);

    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    let staging_a = keys::staging_key(user_a, "general", 1700000000, Uuid::new_v4(), "jpg");
    let staging_b = keys::staging_key(user_b, "general", 1700000100, Uuid::new_v4(), "jpg");
    store.set_object(&staging_a, data.clone(), "image/jpeg");
    store.set_object(&staging_b, data, "image/jpeg");

    let engine = test_engine(repo.clone(), store.clone());

    let first = engine
        .queue_processing(&staging_a, "general", user_a, None)
        .await
        .unwrap();
    let first_job = wait_for_job(&repo, first, ProcessingStatus::Ready).await;

    let second = engine
        .queue_processing(&staging_b, "general", user_b, None)
        .await
        .unwrap();
    let second_job = wait_for_job(&repo, second, ProcessingStatus::Ready).await;

    assert_eq!(repo.asset_count(), 1);
    assert_eq!(first_job.asset_id, second_job.asset_id);
    // The duplicate staging object was cleaned up.
    assert!(!store.has_object(&staging_b));
}

#[tokio::test(flavor = "multi_thread")]
async fn oversize_upload_fails_terminally_without_an_asset() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let user = Uuid::new_v4();
    let staging = keys::staging_key(user, "gallery", 1700000000, Uuid::new_v4(), "jpg");

    // 20 MiB with a JPEG signature: rejected on size before any decode.
    let mut data = vec![0u8; 20 * 1024 * 1024];
    data[..3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);
    store.set_object(&staging, data, "image/jpeg");

    let engine = test_engine(repo.clone(), store.clone());
    let job_id = engine
        .queue_processing(&staging, "gallery", user, None)
        .await
        .unwrap();

    let job = wait_for_job(&repo, job_id, ProcessingStatus::Failed).await;
    let err = job.last_error.unwrap();
    assert!(
        err.contains("file size 20971520 exceeds maximum 15728640 bytes"),
        "unexpected error: {err}"
    );
    // Validation failures are not retried.
    assert_eq!(job.attempts, 1);
    assert_eq!(repo.asset_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_download_failure_is_retried() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let user = Uuid::new_v4();
    let staging = keys::staging_key(user, "general", 1700000000, Uuid::new_v4(), "jpg");
    store.set_object(&staging, jpeg_fixture(400, 300), "image/jpeg");
    store.fail_gets(1);

    let engine = test_engine(repo.clone(), store.clone());
    let job_id = engine
        .queue_processing(&staging, "general", user, None)
        .await
        .unwrap();

    let job = wait_for_job(&repo, job_id, ProcessingStatus::Ready).await;
    // First attempt failed on download, second succeeded.
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.is_none());
    assert!(job.asset_id.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn reprocess_bumps_version_and_writes_new_keys() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let user = Uuid::new_v4();
    let staging = keys::staging_key(user, "gallery", 1700000000, Uuid::new_v4(), "jpg");
    store.set_object(&staging, jpeg_fixture(1024, 768), "image/jpeg");

    let engine = test_engine(repo.clone(), store.clone());
    let first = engine
        .queue_processing(&staging, "gallery", user, None)
        .await
        .unwrap();
    let first_job = wait_for_job(&repo, first, ProcessingStatus::Ready).await;
    let asset_v1 = repo
        .get_asset_by_id(first_job.asset_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    let v1_keys: Vec<String> = asset_v1
        .derivatives
        .iter()
        .map(|d| d.storage_key.clone())
        .collect();

    let crop = CropConfig {
        x: 0.1,
        y: 0.1,
        width: 0.5,
        height: 0.5,
    };
    let original = keys::original_key(&asset_v1.content_hash);
    let second = engine
        .queue_reprocessing(&original, "gallery", user, Some(crop))
        .await
        .unwrap();
    let second_job = wait_for_job(&repo, second, ProcessingStatus::Ready).await;
    assert_eq!(second_job.asset_id, Some(asset_v1.id));

    let asset_v2 = repo
        .get_asset_by_id(asset_v1.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(asset_v2.version, 2);
    assert!(asset_v2
        .derivatives
        .iter()
        .all(|d| d.storage_key.contains("/v2/")));

    // v1 objects are still addressable by their explicit keys.
    for key in v1_keys {
        assert!(store.has_object(&key));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_recovery_reenqueues_only_pending_jobs() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let user = Uuid::new_v4();

    let staging = keys::staging_key(user, "general", 1700000000, Uuid::new_v4(), "jpg");
    store.set_object(&staging, jpeg_fixture(500, 400), "image/jpeg");
    let pending = ProcessingJob::new(staging, "general".into(), user, None, false);
    let pending_id = pending.id;
    repo.insert_job(pending);

    // A job interrupted mid-pipeline stays where it was: not recovered.
    let mut interrupted = ProcessingJob::new(
        keys::staging_key(user, "general", 1700000001, Uuid::new_v4(), "jpg"),
        "general".into(),
        user,
        None,
        false,
    );
    interrupted.status = ProcessingStatus::Processing;
    let interrupted_id = interrupted.id;
    repo.insert_job(interrupted);

    let _engine = test_engine(repo.clone(), store.clone());

    wait_for_job(&repo, pending_id, ProcessingStatus::Ready).await;
    assert_eq!(
        repo.job(interrupted_id).unwrap().status,
        ProcessingStatus::Processing
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn derivative_key_resolution_honors_accept_preference() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let user = Uuid::new_v4();
    let staging = keys::staging_key(user, "cover", 1700000000, Uuid::new_v4(), "jpg");
    store.set_object(&staging, jpeg_fixture(1280, 720), "image/jpeg");

    let engine = test_engine(repo.clone(), store.clone());
    let job_id = engine
        .queue_processing(&staging, "cover", user, None)
        .await
        .unwrap();
    let job = wait_for_job(&repo, job_id, ProcessingStatus::Ready).await;
    let asset = repo
        .get_asset_by_id(job.asset_id.unwrap())
        .await
        .unwrap()
        .unwrap();

    let (key, format) = engine
        .get_derivative_key(&asset.content_hash, "cover_640", Some(OutputFormat::Avif))
        .await
        .unwrap();
    assert_eq!(format, "avif");
    assert!(key.ends_with("cover_640.avif"));

    // No preference: avif outranks webp and jpeg.
    let (_, format) = engine
        .get_derivative_key(&asset.content_hash, "cover_640", None)
        .await
        .unwrap();
    assert_eq!(format, "avif");

    // cover_1920 was skipped (source 1280 wide); fallback picks a sibling.
    let (key, _) = engine
        .get_derivative_key(&asset.content_hash, "cover_1920", None)
        .await
        .unwrap();
    assert!(key.contains("cover_"));
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_processing_rejects_foreign_staging_keys() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let engine = test_engine(repo.clone(), store.clone());

    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let staging = keys::staging_key(owner, "general", 1700000000, Uuid::new_v4(), "jpg");

    let err = engine
        .queue_processing(&staging, "general", intruder, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Unauthorized(_)));

    let err = engine
        .queue_reprocessing("uploads/tmp/evil/key.jpg", "general", intruder, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Unauthorized(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_staging_object_eventually_fails() {
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryStore::new());
    let user = Uuid::new_v4();
    let staging = keys::staging_key(user, "general", 1700000000, Uuid::new_v4(), "jpg");

    let engine = test_engine(repo.clone(), store.clone());
    let job_id = engine
        .queue_processing(&staging, "general", user, None)
        .await
        .unwrap();

    // NotFound is not retryable: the job fails on the first attempt.
    let job = wait_for_job(&repo, job_id, ProcessingStatus::Failed).await;
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("not found"));
}
