use std::io::Write;
use std::process::Command;

fn remap_binary() -> String {
    std::env::var("CARGO_BIN_EXE_remap").unwrap_or_else(|_| {
        let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("remap");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    })
}

#[test]
fn remap_exits_non_zero_without_arguments() {
    let output = Command::new(remap_binary())
        .arg("--")
        .output()
        .expect("run remap");

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("usage:"), "missing usage line: {stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "missing error line: {stderr}");
}

#[test]
fn remap_exits_non_zero_on_missing_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mappings = dir.path().join("mappings.tiny");
    std::fs::write(&mappings, "v1\tofficial\tnamed\nCLASS\ta\tMain\n").expect("write mappings");

    let output = Command::new(remap_binary())
        .arg("--")
        .arg(dir.path().join("missing.jar"))
        .arg(dir.path().join("out.jar"))
        .arg(&mappings)
        .arg("official")
        .arg("named")
        .output()
        .expect("run remap");

    assert!(!output.status.success());
}

#[test]
fn remap_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.jar");
    {
        let file = std::fs::File::create(&input).expect("create jar");
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("note.txt", zip::write::SimpleFileOptions::default())
            .expect("entry");
        writer.write_all(b"hi").expect("bytes");
        writer.finish().expect("finish");
    }
    let mappings = dir.path().join("mappings.tiny");
    std::fs::write(&mappings, "v1\tofficial\tnamed\nCLASS\ta\tMain\n").expect("write mappings");
    let output_jar = dir.path().join("out.jar");
    std::fs::write(&output_jar, b"already here").expect("existing output");

    let run = |force: bool| {
        let mut command = Command::new(remap_binary());
        if force {
            command.arg("--force");
        }
        command
            .arg("--")
            .arg(&input)
            .arg(&output_jar)
            .arg(&mappings)
            .arg("official")
            .arg("named")
            .output()
            .expect("run remap")
    };

    assert!(!run(false).status.success());
    let forced = run(true);
    assert!(
        forced.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&forced.stderr)
    );
}
