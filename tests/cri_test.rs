mod helpers;

use helpers::{FakeRunner, ids};
use kuberuntime::cruntime::cri;
use kuberuntime::cruntime::{ContainerState, ListContainersOptions};

const ROOT: &str = "/run/containerd/runc/k8s.io";

#[test]
fn test_list_without_namespaces_is_one_invocation() {
    let runner = FakeRunner::new();
    runner.respond("sudo crictl ps", "abc\ndef\n");
    let opts = ListContainersOptions {
        name: "coredns".to_string(),
        ..Default::default()
    };

    let found = cri::list_cri_containers(&runner, ROOT, &opts).unwrap();
    assert_eq!(found, ids(&["abc", "def"]));
    assert_eq!(runner.commands(), vec!["sudo crictl ps -a --quiet --name=coredns"]);
}

#[test]
fn test_list_runs_once_per_namespace_and_dedupes() {
    let runner = FakeRunner::new();
    runner.respond("sudo crictl ps", "abc\nabc\ndef\n");
    let opts = ListContainersOptions {
        namespaces: ids(&["kube-system", "default"]),
        ..Default::default()
    };

    let found = cri::list_cri_containers(&runner, ROOT, &opts).unwrap();
    assert_eq!(found, ids(&["abc", "def"]));
    assert_eq!(
        runner.commands(),
        vec![
            "sudo crictl ps -a --quiet --label io.kubernetes.pod.namespace=kube-system",
            "sudo crictl ps -a --quiet --label io.kubernetes.pod.namespace=default",
        ]
    );
}

#[test]
fn test_list_state_filter_uses_runc() {
    let runner = FakeRunner::new();
    runner.respond("sudo crictl ps", "abc\ndef\nghi\n");
    runner.respond(
        "sudo runc",
        r#"[{"id":"abc","status":"running"},{"id":"def","status":"paused"},{"id":"xyz","status":"paused"}]"#,
    );
    let opts = ListContainersOptions {
        state: ContainerState::Paused,
        ..Default::default()
    };

    let found = cri::list_cri_containers(&runner, ROOT, &opts).unwrap();
    assert_eq!(found, ids(&["def"]));
    assert_eq!(
        runner.commands()[1],
        format!("sudo runc --root {} list -f json", ROOT)
    );
}

#[test]
fn test_list_state_filter_handles_null_runc_output() {
    let runner = FakeRunner::new();
    runner.respond("sudo crictl ps", "abc\n");
    runner.respond("sudo runc", "null\n");
    let opts = ListContainersOptions {
        state: ContainerState::Running,
        ..Default::default()
    };
    assert!(cri::list_cri_containers(&runner, "", &opts).unwrap().is_empty());
    assert_eq!(runner.commands()[1], "sudo runc list -f json");
}

#[test]
fn test_pause_is_a_single_invocation() {
    let runner = FakeRunner::new();
    cri::pause_cri_containers(&runner, ROOT, &ids(&["a", "b"])).unwrap();

    let specs = runner.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].command, "/bin/bash");
    assert_eq!(
        specs[0].args,
        vec![
            "-c".to_string(),
            format!("sudo runc --root {0} pause a && sudo runc --root {0} pause b", ROOT),
        ]
    );
}

#[test]
fn test_unpause_resumes_without_root() {
    let runner = FakeRunner::new();
    cri::unpause_cri_containers(&runner, "", &ids(&["a"])).unwrap();
    assert_eq!(runner.commands(), vec!["/bin/bash -c sudo runc resume a"]);
}

#[test]
fn test_empty_id_lists_issue_nothing() {
    let runner = FakeRunner::new();
    cri::kill_cri_containers(&runner, &[]).unwrap();
    cri::stop_cri_containers(&runner, &[]).unwrap();
    cri::pause_cri_containers(&runner, ROOT, &[]).unwrap();
    cri::unpause_cri_containers(&runner, ROOT, &[]).unwrap();
    assert!(runner.commands().is_empty());
}

#[test]
fn test_failed_crictl_call_propagates() {
    let runner = FakeRunner::new();
    runner.fail("sudo crictl stop", "context deadline exceeded");
    let err = cri::stop_cri_containers(&runner, &ids(&["a"])).unwrap_err();
    assert_eq!(err.to_string(), "crictl");
    let typed = err.downcast_ref::<kuberuntime::RuntimeError>().unwrap();
    assert_eq!(typed.output(), Some("context deadline exceeded"));
}

#[test]
fn test_log_cmd_falls_back_to_bare_crictl() {
    let runner = FakeRunner::new();
    assert_eq!(cri::cri_container_log_cmd(&runner, "abc", 0, true), "sudo crictl logs --follow abc");
}

#[test]
fn test_populate_cri_config() {
    let runner = FakeRunner::new();
    cri::populate_cri_config(&runner, "/var/run/cri-dockerd.sock").unwrap();
    let copies = runner.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].target_path(), "/etc/crictl.yaml");
    assert_eq!(copies[0].permissions(), "0644");
    assert_eq!(
        copies[0].content().unwrap(),
        b"runtime-endpoint: unix:///var/run/cri-dockerd.sock\n"
    );
}
