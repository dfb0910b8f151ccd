use common::config::SandboxConfig;
use remo::{ExecutionStatus, JobRequest, JobState, Remo};
use std::process::{Command, Stdio};

fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

fn engine() -> Remo {
    Remo::new(&SandboxConfig {
        default_time_limit_secs: 3,
        default_memory_limit_kb: 256 * 1024,
        ..SandboxConfig::default()
    })
}

fn request(lang: &str, source: &str) -> JobRequest {
    JobRequest {
        lang: lang.to_string(),
        source: source.to_string(),
        ..JobRequest::default()
    }
}

#[test]
fn bash_job_echoes_stdin() {
    let result = engine().run_request(JobRequest {
        stdin: Some("7\n".to_string()),
        ..request("BASH", "read n; echo $((n * 6))")
    });
    assert_eq!(result.status, ExecutionStatus::Success, "{result:?}");
    let run_log = result.run_log.expect("run log");
    assert_eq!(run_log.stdout, "42\n");
    assert!(result.compile_log.is_none());
}

#[test]
fn unknown_language_is_rejected_before_running() {
    let result = engine().run_request(request("COBOL", "DISPLAY 'HI'."));
    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("unsupported language"));
    assert!(result.run_log.is_none());
}

#[test]
fn runaway_program_hits_time_limit() {
    let result = engine().run_request(JobRequest {
        time_limit: Some(1),
        ..request("BASH", "while true; do :; done")
    });
    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("time limit exceeded"));
}

#[test]
fn nonzero_exit_keeps_run_output() {
    let result = engine().run_request(request("BASH", "echo partial; echo oops >&2; exit 3"));
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(
        result.message.as_deref(),
        Some("program exited with status 3")
    );
    let run_log = result.run_log.expect("run log");
    assert_eq!(run_log.stdout, "partial\n");
    assert_eq!(run_log.stderr, "oops\n");
}

#[test]
fn scoped_workdir_is_removed_with_job() {
    let remo = engine();
    let mut job = remo.job(request("BASH", "echo hi")).expect("job");
    let workdir = job.workdir().to_path_buf();
    let result = remo.execute(&mut job);
    assert!(result.is_success());
    assert_eq!(job.state(), JobState::Succeeded);
    assert!(workdir.join("main.sh").exists());
    drop(job);
    assert!(!workdir.exists());
}

#[test]
fn provided_path_is_left_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = engine().run_request(JobRequest {
        path: Some(dir.path().to_path_buf()),
        source_file_name: Some("script.sh".to_string()),
        ..request("BASH", "pwd")
    });
    assert!(result.is_success(), "{result:?}");
    assert!(dir.path().join("script.sh").exists());
}

#[test]
fn python_job_runs_when_interpreter_present() {
    if !tool_available("python3") {
        return;
    }
    let result = engine().run_request(JobRequest {
        stdin: Some("3 4\n".to_string()),
        ..request("PYTHON", "a, b = map(int, input().split())\nprint(a + b)\n")
    });
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.run_log.expect("run log").stdout, "7\n");
}

#[test]
fn c_compile_error_reports_compiler_log() {
    if !tool_available("gcc") {
        return;
    }
    let result = engine().run_request(request("C", "int main( { return 0; }"));
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.message.as_deref(), Some("compilation failed"));
    assert!(result.run_log.is_none());
    assert!(!result.compile_log.expect("compile log").stderr.is_empty());
}

#[test]
fn cpp_program_runs_after_compile() {
    if !tool_available("g++") {
        return;
    }
    let source = "#include <iostream>\nint main() { int x; std::cin >> x; std::cout << x * 2 << std::endl; }\n";
    let result = engine().run_request(JobRequest {
        stdin: Some("21".to_string()),
        ..request("CPP", source)
    });
    assert!(result.is_success(), "{result:?}");
    assert!(result.compile_log.is_some());
    assert_eq!(result.run_log.expect("run log").stdout, "42\n");
}

#[test]
fn java_rejects_ambiguous_entry_points() {
    if !tool_available("javac") || !tool_available("javap") {
        return;
    }
    let source = "public class Main { public static void main(String[] a) {} }\n\
                  class Other { public static void main(String[] a) {} }\n";
    let result = engine().run_request(request("JAVA", source));
    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result
        .message
        .as_deref()
        .unwrap_or_default()
        .starts_with("multiple entry points found"));
}

#[test]
fn java_rejects_missing_entry_point() {
    if !tool_available("javac") || !tool_available("javap") {
        return;
    }
    let result = engine().run_request(request("JAVA", "public class Main { }\n"));
    assert_eq!(result.message.as_deref(), Some("no entry point found"));
}

#[test]
fn java_program_runs_at_default_limits() {
    if !tool_available("javac") || !tool_available("javap") || !tool_available("java") {
        return;
    }
    let remo = Remo::new(&SandboxConfig::default());
    let source = "public class Main { public static void main(String[] a) { System.out.println(\"hi\"); } }\n";
    let result = remo.run_request(request("JAVA", source));
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.run_log.expect("run log").stdout, "hi\n");
}

#[test]
fn java_entry_point_inside_package_is_found() {
    if !tool_available("javac") || !tool_available("javap") || !tool_available("java") {
        return;
    }
    let source = "package demo;\n\
                  public class Main { public static void main(String[] a) { System.out.println(\"packaged\"); } }\n";
    let result = Remo::new(&SandboxConfig::default()).run_request(request("JAVA", source));
    assert!(result.is_success(), "{result:?}");
    assert_eq!(result.run_log.expect("run log").stdout, "packaged\n");
}

#[test]
fn java_entry_point_failure_keeps_compile_log() {
    if !tool_available("javac") || !tool_available("javap") {
        return;
    }
    let result = engine().run_request(request("JAVA", "public class Main { }\n"));
    assert_eq!(result.message.as_deref(), Some("no entry point found"));
    assert!(result.compile_log.is_some(), "{result:?}");
    assert!(result.run_log.is_none());
}

#[test]
fn oversized_allocation_hits_memory_limit() {
    if !tool_available("python3") {
        return;
    }
    let result = engine().run_request(JobRequest {
        memory_limit: Some(128 * 1024),
        ..request("PYTHON", "buffer = bytearray(10**9)\nprint(len(buffer))\n")
    });
    assert_eq!(result.status, ExecutionStatus::Error, "{result:?}");
    assert!(
        result
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("memory limit exceeded"),
        "{result:?}"
    );
}

#[test]
fn flood_of_output_is_clipped() {
    let result = engine().run_request(request(
        "BASH",
        "head -c 20000000 /dev/zero | tr '\\0' x; echo finished",
    ));
    assert!(result.is_success(), "{result:?}");
    let run_log = result.run_log.expect("run log");
    assert!(run_log.truncated);
    assert!(run_log.stdout.len() <= SandboxConfig::default().max_output_bytes + 32);
    assert!(run_log.stdout.ends_with("...<truncated>\n"));
}
