
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use beamline_launch::adapter::command_file::{command_from_label, read_command_file};
use beamline_launch::adapter::{Adapter, AdapterKind, ClusterAdapter, Dispatched, PreparedJob};
use beamline_launch::broker::{Broker, InMemoryBroker};
use beamline_launch::config::{ClusterConfig, RunnerConfig};
use beamline_launch::error::LaunchError;
use beamline_launch::job::JobDescriptor;
use beamline_launch::registry::WorkerSpec;
use test_harness::{assert_eventually, worker, write_script};

const RESULTS: &str = "jobs:results";

fn spec_in(launch_dir: &Path, adapter: &str) -> WorkerSpec {
    let mut spec = worker("w1", &["ALL"], &[]);
    spec.launch_dir = launch_dir.to_path_buf();
    spec.adapter_name = adapter.to_string();
    spec
}

fn adapter(kind: AdapterKind, runner: &Path, cluster: ClusterConfig) -> (Adapter, Arc<InMemoryBroker>) {
    let broker = Arc::new(InMemoryBroker::new());
    let shared: Arc<dyn Broker> = broker.clone();
    let adapter = Adapter::from_parts(
        kind,
        "TEST",
        RunnerConfig {
            program: runner.display().to_string(),
        },
        cluster,
        shared,
        RESULTS,
    );
    (adapter, broker)
}

#[tokio::test]
async fn test_shell_adapter_runs_runner_in_work_dir() {
    let dir = tempfile::tempdir().unwrap();
    let launch_dir = dir.path().join("launch");
    let runner = dir.path().join("runner.sh");
    write_script(&runner, "echo \"$@\" > runner_args.txt");

    let (adapter, _) = adapter(AdapterKind::Shell, &runner, ClusterConfig::default());
    let job = JobDescriptor::new("INDEX", "p1", "/data/group/single/B_1").with_site_tag("LAB_A");

    let dispatched = adapter
        .execute(job, &spec_in(&launch_dir, "shell"))
        .await
        .unwrap();

    let command_file = match dispatched {
        Dispatched::Spawned { pid, command_file } => {
            assert!(pid.is_some());
            command_file
        }
        other => panic!("unexpected dispatch {:?}", other),
    };

    // Command file lands under command_files and names its command.
    assert_eq!(
        command_file.parent().unwrap(),
        launch_dir.join("command_files")
    );
    let label = command_file.file_stem().unwrap().to_str().unwrap().to_string();
    assert_eq!(command_from_label(&label), Some("INDEX"));

    // Work directory was re-rooted under launch_dir and created.
    let work_dir = launch_dir.join("data/group/single/B_1");
    assert!(work_dir.is_dir());

    let written = read_command_file(&command_file).unwrap();
    assert_eq!(written.directories.work, work_dir);
    assert_eq!(written.directories.launch_dir, Some(launch_dir.clone()));

    let args_file = work_dir.join("runner_args.txt");
    assert_eventually(
        || {
            let args_file = args_file.clone();
            async move {
                std::fs::read_to_string(&args_file)
                    .map(|args| args.ends_with('\n'))
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(5),
        "runner should write its arguments",
    )
    .await;
    let args = std::fs::read_to_string(&args_file).unwrap();
    assert_eq!(
        args.trim(),
        format!("-s LAB_A {}", command_file.display())
    );
}

#[tokio::test]
async fn test_shell_adapter_allocates_fresh_dir_on_collision() {
    let dir = tempfile::tempdir().unwrap();
    let launch_dir = dir.path().join("launch");
    std::fs::create_dir_all(launch_dir.join("single/B_1")).unwrap();

    let (adapter, _) = adapter(AdapterKind::Shell, Path::new("true"), ClusterConfig::default());
    let job = JobDescriptor::new("INTEGRATE", "p2", "single/B_1");
    let dispatched = adapter
        .execute(job, &spec_in(&launch_dir, "shell"))
        .await
        .unwrap();

    let Dispatched::Spawned { command_file, .. } = dispatched else {
        panic!("expected a spawned job");
    };
    let written = read_command_file(&command_file).unwrap();
    assert_eq!(written.directories.work, launch_dir.join("single/B_1_1"));
}

#[tokio::test]
async fn test_work_path_naming_launch_dir_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let launch_dir = dir.path().join("launch");
    std::fs::create_dir_all(&launch_dir).unwrap();

    let (adapter, _) = adapter(AdapterKind::Shell, Path::new("true"), ClusterConfig::default());
    for (i, work) in ["", "/", ".."].into_iter().enumerate() {
        let job = JobDescriptor::new("INDEX", format!("bad{}", i), work);
        let err = adapter
            .execute(job, &spec_in(&launch_dir, "shell"))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::InvalidJob(_)), "{:?}: {:?}", work, err);
    }

    // Nothing was allocated beside launch_dir.
    let siblings: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(siblings, vec![std::ffi::OsString::from("launch")]);
    assert!(!launch_dir.join("command_files").exists());
}

#[tokio::test]
async fn test_shell_adapter_missing_runner_is_execution_error() {
    let dir = tempfile::tempdir().unwrap();
    let (adapter, _) = adapter(
        AdapterKind::Shell,
        &dir.path().join("no-such-runner"),
        ClusterConfig::default(),
    );
    let job = JobDescriptor::new("INDEX", "p3", "single/B_1");

    let err = adapter
        .execute(job, &spec_in(&dir.path().join("launch"), "shell"))
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::AdapterExecution { .. }));
}

#[tokio::test]
async fn test_cluster_adapter_reports_scheduler_id() {
    let dir = tempfile::tempdir().unwrap();
    let launch_dir = dir.path().join("launch");
    let qsub = dir.path().join("qsub.sh");
    let args_file = dir.path().join("qsub_args.txt");
    write_script(
        &qsub,
        &format!("echo \"$@\" > {}\necho 4242", args_file.display()),
    );

    let cluster = ClusterConfig {
        submit_program: qsub.display().to_string(),
        ..ClusterConfig::default()
    };
    let (adapter, _) = adapter(AdapterKind::Cluster, Path::new("launch-runner"), cluster);
    let job = JobDescriptor::new("INDEX", "p4", "single/B_1");

    let dispatched = adapter
        .execute(job, &spec_in(&launch_dir, "qsub"))
        .await
        .unwrap();
    let Dispatched::Submitted {
        label,
        command_file,
        external_id,
    } = dispatched
    else {
        panic!("expected a cluster submission");
    };

    let id = tokio::time::timeout(Duration::from_secs(5), external_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id.as_deref(), Some("4242"));

    let args = std::fs::read_to_string(&args_file).unwrap();
    let expected = format!(
        "-terse -cwd -b y -N {} -q phase3.q -pe smp 4 -wd {} launch-runner -s TEST {}",
        label,
        launch_dir.join("single/B_1").display(),
        command_file.display()
    );
    assert_eq!(args.trim(), expected);
}

#[test]
fn test_cluster_submit_args_use_default_queue() {
    let cluster = ClusterAdapter::new(ClusterConfig::default(), RunnerConfig::default());
    let prepared = PreparedJob {
        job: JobDescriptor::new("MERGE", "p5", "w"),
        work_dir: PathBuf::from("/launch/w"),
        command_file: PathBuf::from("/launch/command_files/MERGE_x.rapd"),
        label: "MERGE_x".to_string(),
        nproc: 1,
        site_tag: "LAB_B".to_string(),
    };

    let args = cluster.submit_args(&prepared);
    let queue = args.iter().position(|a| a == "-q").unwrap();
    assert_eq!(args[queue + 1], "all.q");
    assert_eq!(args[args.len() - 4], "launch-runner");
    assert_eq!(args[args.len() - 2], "LAB_B");
    assert_eq!(args[args.len() - 1], "/launch/command_files/MERGE_x.rapd");
}

#[tokio::test]
async fn test_echo_adapter_publishes_and_pushes_result() {
    let dir = tempfile::tempdir().unwrap();
    let (adapter, broker) = adapter(AdapterKind::Echo, Path::new("true"), ClusterConfig::default());
    let job = JobDescriptor::new("ECHO", "p6", "unused");

    let dispatched = adapter
        .execute(job, &spec_in(dir.path(), "echo"))
        .await
        .unwrap();
    assert!(matches!(dispatched, Dispatched::Echoed { ref process_id } if process_id == "p6"));

    let published = broker.published(RESULTS).await;
    assert_eq!(published.len(), 1);
    let echoed = JobDescriptor::from_payload(&published[0]).unwrap();
    assert_eq!(echoed.status, Some(100));
    assert_eq!(broker.contents(RESULTS).await, published);

    // Nothing touched the filesystem.
    assert!(!dir.path().join("command_files").exists());
}

#[tokio::test]
async fn test_cluster_adapter_forwards_echo_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = ClusterConfig {
        submit_program: dir.path().join("never-called").display().to_string(),
        ..ClusterConfig::default()
    };
    let (adapter, broker) = adapter(AdapterKind::Cluster, Path::new("true"), cluster);

    let dispatched = adapter
        .execute(
            JobDescriptor::new("ECHO", "p7", "unused"),
            &spec_in(dir.path(), "qsub"),
        )
        .await
        .unwrap();

    assert!(matches!(dispatched, Dispatched::Echoed { .. }));
    assert_eq!(broker.len(RESULTS).await.unwrap(), 1);
}
