use std::collections::HashSet;
use std::time::Duration;

use cloudferry_core::entry::{AccessGrant, DestRole, SharingDescriptor};
use cloudferry_core::providers::memory::{DestCall, DestOp, SourceCall};
use cloudferry_core::providers::{MemoryDestination, MemorySource};
use cloudferry_core::report::JsonReportWriter;
use cloudferry_core::{MemoryCheckpointStore, MigrationOptions, MigrationPhase};
use std::sync::Arc;

mod common;
use common::{bytes, options, sample_tree, Harness};

fn excluding() -> MigrationOptions {
    MigrationOptions {
        exclude_patterns: vec![".DS_Store".into(), "*.tmp".into(), "node_modules".into()],
        ..options()
    }
}

#[tokio::test]
async fn migrates_tree_into_destination_root() {
    let harness = Harness::new(sample_tree(), MemoryDestination::new());
    let report = harness.run(excluding()).await;

    assert_eq!(report.phase, MigrationPhase::Done);
    assert!(report.is_success());
    assert_eq!(report.files_scanned, 4);
    assert_eq!(report.folders_scanned, 3);
    assert_eq!(report.files_migrated, 4);
    assert_eq!(report.bytes_transferred, 70);
    assert_eq!(report.files_failed, 0);
    assert!(report.verification.as_ref().is_some_and(|v| v.is_consistent()));

    assert_eq!(
        harness.dest.file_paths(),
        vec![
            "/Migration/Photos/beach.jpg",
            "/Migration/Projects/2024/budget.xlsx",
            "/Migration/Projects/plan.docx",
            "/Migration/notes.txt",
        ]
    );
    let budget = harness
        .dest
        .file_at("/Migration/Projects/2024/budget.xlsx")
        .expect("budget uploaded");
    assert_eq!(budget.data, bytes(20, 2));
    assert_eq!(
        budget.metadata.mime_type,
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );

    assert_eq!(
        harness.checkpointed_paths(),
        vec![
            "/Photos/beach.jpg",
            "/Projects/2024/budget.xlsx",
            "/Projects/plan.docx",
            "/notes.txt",
        ]
    );
    let summaries = harness.checkpoint.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].files_processed, 4);
}

#[tokio::test]
async fn excluded_entries_never_reach_destination() {
    let harness = Harness::new(sample_tree(), MemoryDestination::new());
    harness.run(excluding()).await;

    for call in harness.dest.calls() {
        let name = match &call {
            DestCall::ResolveFolder { name, .. }
            | DestCall::CreateSmall { name, .. }
            | DestCall::OpenSession { name, .. } => name.as_str(),
            _ => continue,
        };
        assert!(
            !matches!(name, ".DS_Store" | "scratch.tmp" | "node_modules" | "left-pad" | "index.js"),
            "excluded entry reached destination: {call:?}"
        );
    }
    for call in harness.source.calls() {
        if let SourceCall::GetContent { content_id, .. } = call {
            assert!(!content_id.contains("node_modules"), "read excluded content {content_id}");
            assert!(!content_id.ends_with(".tmp"), "read excluded content {content_id}");
        }
    }
    assert!(harness
        .checkpointed_paths()
        .iter()
        .all(|p| !p.contains(".DS_Store") && !p.ends_with(".tmp") && !p.contains("node_modules")));
}

#[tokio::test]
async fn planning_is_deterministic() {
    let first = Harness::new(sample_tree(), MemoryDestination::new());
    let second = Harness::new(sample_tree(), MemoryDestination::new());

    let a = first.orchestrator(excluding()).plan().await.expect("plan");
    let b = first.orchestrator(excluding()).plan().await.expect("plan");
    let c = second.orchestrator(excluding()).plan().await.expect("plan");
    assert_eq!(a, b);
    assert_eq!(a, c);
    assert_eq!(
        a.dest_paths(),
        vec![
            "/Migration/Photos",
            "/Migration/Photos/beach.jpg",
            "/Migration/Projects",
            "/Migration/Projects/2024",
            "/Migration/Projects/2024/budget.xlsx",
            "/Migration/Projects/plan.docx",
            "/Migration/notes.txt",
        ]
    );
    assert!(first.dest.calls().is_empty(), "planning touched the destination");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_create_each_folder_once() {
    let mut source = MemorySource::new();
    for dir in ["alpha", "beta"] {
        for sub in ["one", "two"] {
            for i in 0..6 {
                source = source.with_file(&format!("/{dir}/{sub}/file-{i}.bin"), bytes(16, i as u8));
            }
        }
    }
    let harness = Harness::new(source, MemoryDestination::new().with_latency(Duration::from_millis(3)));
    let report = harness
        .run(MigrationOptions {
            parallel_uploads: 8,
            ..options()
        })
        .await;

    assert_eq!(report.files_migrated, 24);
    // Migration, alpha, beta and two subfolders under each
    assert_eq!(harness.dest.count(DestOp::ResolveFolder), 7);
    assert_eq!(report.folders_created, 7);
    let folders = harness.dest.folder_paths();
    let unique: HashSet<_> = folders.iter().collect();
    assert_eq!(unique.len(), folders.len());
    assert_eq!(harness.dest.file_paths().len(), 24);
}

#[tokio::test]
async fn resume_only_transfers_missing_files() {
    let source = MemorySource::new()
        .with_file("/A.txt", bytes(3, 1))
        .with_file("/B.txt", bytes(4, 2))
        .with_file("/C.txt", bytes(5, 3));
    let harness = Harness::with_checkpoint(
        source,
        MemoryDestination::new(),
        MemoryCheckpointStore::with_paths(["/A.txt", "/B.txt"]),
    );
    let report = harness
        .run(MigrationOptions {
            resume: true,
            ..options()
        })
        .await;

    assert_eq!(report.files_migrated, 1);
    assert_eq!(report.files_skipped, 2);
    assert_eq!(report.bytes_skipped, 7);
    assert_eq!(report.bytes_transferred, 5);
    assert!(report.verification.as_ref().is_some_and(|v| v.is_consistent()));

    let uploads: Vec<_> = harness
        .dest
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            DestCall::CreateSmall { name, .. } | DestCall::OpenSession { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, vec!["C.txt"]);
    let reads: Vec<_> = harness
        .source
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            SourceCall::GetContent { content_id, .. } => Some(content_id),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec!["id:/C.txt"]);
    assert_eq!(harness.checkpointed_paths(), vec!["/C.txt"]);
}

#[tokio::test]
async fn without_resume_checkpoint_is_ignored() {
    let source = MemorySource::new().with_file("/A.txt", bytes(3, 1));
    let harness = Harness::with_checkpoint(
        source,
        MemoryDestination::new(),
        MemoryCheckpointStore::with_paths(["/A.txt"]),
    );
    let report = harness.run(options()).await;
    assert_eq!(report.files_migrated, 1);
    assert_eq!(report.files_skipped, 0);
}

#[tokio::test]
async fn sharing_becomes_destination_permissions() {
    let source = sample_tree().with_sharing(
        "/notes.txt",
        SharingDescriptor::shared(vec![
            AccessGrant::new("ana@example.com", "editor"),
            AccessGrant::new("bo@example.com", "viewer"),
            AccessGrant::new("cy@example.com", "commenter"),
            AccessGrant::new("dee@example.com", "owner"),
        ]),
    );
    let harness = Harness::new(source, MemoryDestination::new());
    let report = harness.run(excluding()).await;

    assert_eq!(report.permissions_applied, 4);
    assert_eq!(report.permission_failures, 0);
    let notes = harness.dest.file_at("/Migration/notes.txt").expect("notes uploaded");
    let roles: Vec<_> = notes
        .permissions
        .iter()
        .map(|p| (p.principal.as_str(), p.role))
        .collect();
    assert_eq!(
        roles,
        vec![
            ("ana@example.com", DestRole::Writer),
            ("bo@example.com", DestRole::Reader),
            ("cy@example.com", DestRole::Commenter),
            ("dee@example.com", DestRole::Reader),
        ]
    );
    let plan = harness.dest.file_at("/Migration/Projects/plan.docx").expect("plan uploaded");
    assert!(plan.permissions.is_empty());
}

#[tokio::test]
async fn permission_failures_do_not_fail_the_file() {
    let source = MemorySource::new().with_file("/shared.txt", bytes(6, 1)).with_sharing(
        "/shared.txt",
        SharingDescriptor::shared(vec![
            AccessGrant::new("ana@example.com", "editor"),
            AccessGrant::new("bo@example.com", "viewer"),
        ]),
    );
    let harness = Harness::new(source, MemoryDestination::new());
    // first grant is rejected outright, second succeeds
    harness
        .dest
        .fail_next(DestOp::ApplyPermissions, cloudferry_core::ErrorKind::InvalidRequest, 1);
    let report = harness.run(options()).await;

    assert_eq!(report.files_migrated, 1);
    assert_eq!(report.files_failed, 0);
    assert_eq!(report.permissions_applied, 1);
    assert_eq!(report.permission_failures, 1);
    assert_eq!(harness.checkpointed_paths(), vec!["/shared.txt"]);
}

#[tokio::test]
async fn permissions_are_skipped_when_disabled() {
    let source = MemorySource::new()
        .with_file("/shared.txt", bytes(6, 1))
        .with_sharing("/shared.txt", SharingDescriptor::shared(vec![AccessGrant::new("ana@example.com", "editor")]));
    let harness = Harness::new(source, MemoryDestination::new());
    let report = harness
        .run(MigrationOptions {
            migrate_permissions: false,
            ..options()
        })
        .await;

    assert_eq!(report.permissions_applied, 0);
    assert_eq!(harness.dest.count(DestOp::ApplyPermissions), 0);
    assert!(harness
        .source
        .calls()
        .iter()
        .all(|c| !matches!(c, SourceCall::GetSharing { .. })));
}

#[tokio::test]
async fn large_files_upload_in_chunks() {
    let source = MemorySource::new().with_file("/video.mp4", bytes(10, 7));
    let harness = Harness::new(source, MemoryDestination::new());
    let report = harness
        .run(MigrationOptions {
            chunk_size: 4,
            small_file_threshold: 4,
            ..options()
        })
        .await;

    assert_eq!(report.files_migrated, 1);
    assert_eq!(report.bytes_transferred, 10);
    let offsets: Vec<_> = harness
        .dest
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            DestCall::UploadChunk { offset, len, .. } => Some((offset, len)),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![(0, 4), (4, 4), (8, 2)]);
    let video = harness.dest.file_at("/Migration/video.mp4").expect("video uploaded");
    assert_eq!(video.data, bytes(10, 7));
    assert_eq!(video.metadata.mime_type, "video/mp4");
}

#[tokio::test]
async fn expired_session_restarts_the_file() {
    let source = MemorySource::new().with_file("/video.mp4", bytes(10, 7));
    let harness = Harness::new(source, MemoryDestination::new());
    harness
        .dest
        .fail_next(DestOp::UploadChunk, cloudferry_core::ErrorKind::SessionExpired, 1);
    let report = harness
        .run(MigrationOptions {
            chunk_size: 4,
            small_file_threshold: 4,
            ..options()
        })
        .await;

    assert_eq!(report.files_migrated, 1);
    assert_eq!(harness.dest.count(DestOp::OpenSession), 2);
    assert_eq!(harness.dest.files().len(), 1);
}

#[tokio::test]
async fn dry_run_plans_without_mutating() {
    let dry = Harness::new(sample_tree(), MemoryDestination::new());
    let report = dry
        .run(MigrationOptions {
            dry_run: true,
            ..excluding()
        })
        .await;

    assert!(report.dry_run);
    assert_eq!(report.phase, MigrationPhase::Done);
    assert_eq!(report.files_migrated, 4);
    assert_eq!(report.bytes_transferred, 70);
    assert!(dry.dest.mutation_calls().is_empty(), "dry run mutated: {:?}", dry.dest.mutation_calls());
    assert!(dry.dest.files().is_empty());
    assert!(dry.checkpoint.records().is_empty());
    assert!(dry.checkpoint.summaries().is_empty());

    let real = Harness::new(sample_tree(), MemoryDestination::new());
    let dry_plan = dry
        .orchestrator(MigrationOptions {
            dry_run: true,
            ..excluding()
        })
        .plan()
        .await
        .expect("dry plan");
    let real_plan = real.orchestrator(excluding()).plan().await.expect("real plan");
    assert_eq!(dry_plan, real_plan);
}

#[tokio::test]
async fn shared_drive_hosts_the_destination_root() {
    let harness = Harness::new(
        MemorySource::new().with_file("/a.txt", bytes(2, 1)),
        MemoryDestination::new().with_container("Team"),
    );
    let report = harness
        .run(MigrationOptions {
            use_shared_drive: true,
            shared_drive_name: Some("Team".into()),
            ..options()
        })
        .await;

    assert_eq!(report.files_migrated, 1);
    assert_eq!(harness.dest.file_paths(), vec!["Team:/Migration/a.txt"]);
}

#[tokio::test]
async fn empty_dest_root_targets_provider_root() {
    let harness = Harness::new(
        MemorySource::new().with_file("/docs/a.txt", bytes(2, 1)),
        MemoryDestination::new(),
    );
    let report = harness
        .run(MigrationOptions {
            dest_root: String::new(),
            ..options()
        })
        .await;

    assert_eq!(report.files_migrated, 1);
    assert_eq!(harness.dest.file_paths(), vec!["/docs/a.txt"]);
}

#[tokio::test]
async fn test_mode_prefers_the_test_folder() {
    let source = sample_tree().with_file("/test/sample.txt", bytes(3, 9));
    let harness = Harness::new(source, MemoryDestination::new());
    let report = harness
        .run(MigrationOptions {
            test_mode: Some(Default::default()),
            ..options()
        })
        .await;

    assert_eq!(report.files_migrated, 1);
    assert_eq!(harness.dest.file_paths(), vec!["/Migration/test/sample.txt"]);
}

#[tokio::test]
async fn resume_after_test_mode_keeps_test_files_in_place() {
    let source = MemorySource::new()
        .with_file("/test/a.txt", bytes(4, 1))
        .with_file("/other.txt", bytes(6, 2));
    let harness = Harness::new(source, MemoryDestination::new());

    let trial = harness
        .run(MigrationOptions {
            test_mode: Some(Default::default()),
            ..options()
        })
        .await;
    assert_eq!(trial.files_migrated, 1);
    assert_eq!(harness.checkpointed_paths(), vec!["/test/a.txt"]);

    let resumed = harness
        .run(MigrationOptions {
            resume: true,
            ..options()
        })
        .await;
    assert_eq!(resumed.files_skipped, 1);
    assert_eq!(resumed.files_migrated, 1);
    assert_eq!(
        harness.dest.file_paths(),
        vec!["/Migration/other.txt", "/Migration/test/a.txt"]
    );
}

#[tokio::test]
async fn test_mode_caps_files_without_test_folder() {
    let harness = Harness::new(sample_tree(), MemoryDestination::new());
    let report = harness
        .run(MigrationOptions {
            test_mode: Some(cloudferry_core::TestMode {
                folder: "/test".into(),
                limit: 2,
            }),
            ..excluding()
        })
        .await;

    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.files_migrated, 2);
}

#[tokio::test]
async fn report_is_written_to_sink() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("reports/run.json");
    let harness = Harness::new(sample_tree(), MemoryDestination::new());
    let report = harness
        .orchestrator(excluding())
        .with_report_sink(Arc::new(JsonReportWriter::new(&path)))
        .run(Default::default(), None)
        .await
        .expect("run");

    let raw = std::fs::read_to_string(&path).expect("report file");
    let written: cloudferry_core::MigrationReport = serde_json::from_str(&raw).expect("parse report");
    assert_eq!(written.files_migrated, report.files_migrated);
    assert_eq!(written.phase, MigrationPhase::Done);
}
