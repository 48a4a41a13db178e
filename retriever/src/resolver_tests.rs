//! Unit tests for coordinate resolution.

use super::*;
use crate::credentials::Credential;
use crate::test_utils::{
    ForbiddenTransport, RecordingTransport, StaticCredentialStore, install_artifact, utf8_temp_dir,
};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::json;

const REMOTE: &str = "https://repo.test/stubs";

struct Harness {
    _dir: tempfile::TempDir,
    cache: Utf8PathBuf,
    transport: RecordingTransport,
    credentials: StaticCredentialStore,
}

impl Harness {
    fn resolver(&self) -> CoordinateResolver<'_> {
        CoordinateResolver::new(&self.transport, &self.credentials)
    }

    fn remote_policy(&self) -> ResolutionPolicy {
        ResolutionPolicy::builder(StubsMode::Remote, self.cache.clone())
            .remote(
                RepositoryLocation::new(REMOTE)
                    .expect("valid location")
                    .with_server_id("my-server"),
            )
            .build()
    }

    fn local_policy(&self) -> ResolutionPolicy {
        ResolutionPolicy::builder(StubsMode::LocalOnly, self.cache.clone()).build()
    }

    fn install(&self, coordinate: &str) {
        let coordinate: Coordinate = coordinate.parse().expect("valid coordinate");
        install_artifact(&self.cache, &coordinate, b"jar").expect("install artifact");
    }
}

#[fixture]
fn harness() -> Harness {
    let (dir, cache) = utf8_temp_dir().expect("temp dir");
    Harness {
        _dir: dir,
        cache,
        transport: RecordingTransport::new(),
        credentials: StaticCredentialStore::new()
            .with("my-server", Credential::new("admin", "mypassword")),
    }
}

fn coordinate(raw: &str) -> Coordinate {
    raw.parse().expect("valid coordinate")
}

#[test]
fn concrete_versions_need_no_io() {
    let (_dir, cache) = utf8_temp_dir().expect("temp dir");
    let transport = ForbiddenTransport::default();
    let credentials = StaticCredentialStore::new();
    let policy = ResolutionPolicy::builder(StubsMode::Remote, cache)
        .remote(RepositoryLocation::new(REMOTE).expect("valid"))
        .build();
    let requested = coordinate("org.example:svc:1.2.3:stubs");
    let resolved = CoordinateResolver::new(&transport, &credentials)
        .resolve(&requested, &policy)
        .expect("resolve");
    assert_eq!(resolved, requested);
    assert_eq!(transport.attempts(), 0);
}

#[rstest]
fn latest_picks_highest_local_version(harness: Harness) {
    harness.install("org.example:svc:1.9");
    harness.install("org.example:svc:1.10");
    harness.install("org.example:svc:1.10-SNAPSHOT");
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:+"), &harness.local_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.10");
    assert_eq!(harness.transport.request_count(), 0);
}

#[rstest]
fn release_skips_snapshots(harness: Harness) {
    harness.install("org.example:svc:1.0");
    harness.install("org.example:svc:2.0-SNAPSHOT");
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:release"), &harness.local_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.0");
}

#[rstest]
fn range_is_honoured_across_local_and_remote(harness: Harness) {
    harness.install("org.example:svc:1.2");
    harness.transport.serve_json(
        format!("{REMOTE}/org/example/svc/metadata.json"),
        &json!({"versions": ["1.5", "2.0", "0.9"]}),
    );
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:[1.0,2.0)"), &harness.remote_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.5");
    assert_eq!(harness.transport.usernames(), [Some("admin".to_owned())]);
}

#[rstest]
fn no_candidate_is_reported(harness: Harness) {
    let err = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:latest"), &harness.remote_policy())
        .expect_err("nothing published");
    assert!(matches!(err, ResolutionError::NoCandidateVersion { .. }));
}

#[rstest]
fn malformed_range_is_an_error(harness: Harness) {
    let err = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:[2.0,1.0]"), &harness.local_policy())
        .expect_err("inverted range");
    assert!(matches!(err, ResolutionError::InvalidRange { .. }));
}

#[rstest]
fn unreachable_remote_is_skipped(harness: Harness) {
    let second = "https://mirror.test/stubs";
    harness
        .transport
        .fail(format!("{REMOTE}/org/example/svc/metadata.json"), "connection refused");
    harness.transport.serve_json(
        format!("{second}/org/example/svc/metadata.json"),
        &json!({"versions": ["3.1"]}),
    );
    let policy = ResolutionPolicy::builder(StubsMode::Remote, harness.cache.clone())
        .remote(RepositoryLocation::new(REMOTE).expect("valid"))
        .remote(RepositoryLocation::new(second).expect("valid"))
        .build();
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:+"), &policy)
        .expect("resolve");
    assert_eq!(resolved.version(), "3.1");
}

#[rstest]
fn unsafe_remote_versions_are_ignored(harness: Harness) {
    harness.transport.serve_json(
        format!("{REMOTE}/org/example/svc/metadata.json"),
        &json!({"versions": ["9.0/../../etc", "1.0"]}),
    );
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:+"), &harness.remote_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.0");
}

#[rstest]
fn snapshot_is_pinned_to_remote_build(harness: Harness) {
    harness.transport.serve_json(
        format!("{REMOTE}/org/example/svc/1.0-SNAPSHOT/metadata.json"),
        &json!({"snapshot": {"timestamp": "20240102.030405", "build_number": 7}}),
    );
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:1.0-SNAPSHOT"), &harness.remote_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.0-20240102.030405-7");
}

#[rstest]
fn snapshot_without_metadata_keeps_marker(harness: Harness) {
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:1.0-SNAPSHOT"), &harness.remote_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.0-SNAPSHOT");
}

#[rstest]
fn local_snapshot_short_circuits_remote_metadata(harness: Harness) {
    harness.install("org.example:svc:1.0-SNAPSHOT");
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:1.0-SNAPSHOT"), &harness.remote_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.0-SNAPSHOT");
    assert_eq!(harness.transport.request_count(), 0);
}

#[rstest]
fn local_only_uses_cached_snapshot_build(harness: Harness) {
    harness.install("org.example:svc:1.0-20240102.030405-7");
    let metadata = snapshot_metadata_path(&coordinate("org.example:svc:1.0-SNAPSHOT"))
        .under(&harness.cache);
    std::fs::write(
        metadata,
        json!({"snapshot": {"timestamp": "20240102.030405", "build_number": 7}}).to_string(),
    )
    .expect("write metadata");
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:1.0-SNAPSHOT"), &harness.local_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.0-20240102.030405-7");
}

#[rstest]
#[case::latest("org.example:svc:latest")]
#[case::plus("org.example:svc:+")]
fn local_only_latest_sees_snapshot_cached_as_build(harness: Harness, #[case] raw: &str) {
    harness.install("org.example:svc:0.9");
    harness.install("org.example:svc:1.0-20240102.030405-7");
    let metadata = snapshot_metadata_path(&coordinate("org.example:svc:1.0-SNAPSHOT"))
        .under(&harness.cache);
    std::fs::write(
        metadata,
        json!({"snapshot": {"timestamp": "20240102.030405", "build_number": 7}}).to_string(),
    )
    .expect("write metadata");
    let resolved = harness
        .resolver()
        .resolve(&coordinate(raw), &harness.local_policy())
        .expect("resolve");
    assert_eq!(resolved.version(), "1.0-20240102.030405-7");
    assert_eq!(harness.transport.request_count(), 0);
}

#[rstest]
fn classpath_lists_bundle_roots_only(harness: Harness) {
    let (_bundle_dir, bundle) = utf8_temp_dir().expect("temp dir");
    install_artifact(&bundle, &coordinate("org.example:svc:4.0"), b"jar").expect("install");
    harness.install("org.example:svc:5.0");
    let policy = ResolutionPolicy::builder(StubsMode::Classpath, harness.cache.clone())
        .bundle_root(bundle)
        .build();
    let resolved = harness
        .resolver()
        .resolve(&coordinate("org.example:svc:+"), &policy)
        .expect("resolve");
    assert_eq!(resolved.version(), "4.0");
    assert_eq!(harness.transport.request_count(), 0);
}
