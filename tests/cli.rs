use std::{fs, path::PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

fn rv32dbg() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rv32dbg"));
    cmd.env_remove("RV32DBG_BATCH").env_remove("RV32DBG_LOG");
    cmd
}

fn raw_image(dir: &TempDir, words: &[u32]) -> PathBuf {
    let path = dir.path().join("prog.bin");
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    fs::write(&path, bytes).unwrap();
    path
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8_lossy(&assert.get_output().stdout).into_owned()
}

#[test]
fn builtin_image_hits_good_trap() {
    rv32dbg()
        .arg("-b")
        .assert()
        .success()
        .stdout("rv32dbg: HIT GOOD TRAP at pc = 0x8000000c\n");
}

#[test]
fn batch_mode_from_environment() {
    rv32dbg()
        .env("RV32DBG_BATCH", "true")
        .assert()
        .success()
        .stdout("rv32dbg: HIT GOOD TRAP at pc = 0x8000000c\n");
}

#[test]
fn nonzero_a0_is_a_bad_trap() {
    let dir = tempfile::tempdir().unwrap();
    // addi a0, $0, 3 ; ebreak
    let image = raw_image(&dir, &[0x0030_0513, 0x0010_0073]);
    rv32dbg()
        .arg("-b")
        .arg(&image)
        .assert()
        .code(1)
        .stdout("rv32dbg: HIT BAD TRAP at pc = 0x80000004\n");
}

#[test]
fn invalid_instruction_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let image = raw_image(&dir, &[0xffff_ffff]);
    let assert = rv32dbg().arg("-b").arg(&image).assert().code(1);
    let out = stdout_of(&assert);
    assert!(out.ends_with("rv32dbg: ABORT at pc = 0x80000000\n"), "{out}");
}

#[test]
fn relocated_ram() {
    rv32dbg()
        .args(["-b", "--mem-base", "0x1000", "--mem-size", "4096"])
        .assert()
        .success()
        .stdout("rv32dbg: HIT GOOD TRAP at pc = 0x0000100c\n");
}

#[test]
fn interactive_session() {
    let assert = rv32dbg()
        .write_stdin("p 1+2*3\nw $a0\nsi\np $pc\nc\nq\n")
        .assert()
        .success();
    assert_eq!(
        stdout_of(&assert),
        "(rv32dbg) 0x00000007  7\n\
         (rv32dbg) Watchpoint 0: $a0\n\
         (rv32dbg) (rv32dbg) 0x80000004  -2147483644\n\
         (rv32dbg) rv32dbg: HIT GOOD TRAP at pc = 0x8000000c\n\
         (rv32dbg) "
    );
}

#[test]
fn end_of_input_without_running() {
    rv32dbg()
        .write_stdin("info w\n")
        .assert()
        .success()
        .stdout("(rv32dbg) No watchpoints.\n(rv32dbg) \n");
}

#[test]
fn missing_image_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let assert = rv32dbg()
        .arg("-b")
        .arg(dir.path().join("nope.bin"))
        .assert()
        .code(1);
    let err = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(err.starts_with("Error: cannot read"), "{err}");
}

#[test]
fn zero_sized_ram_is_rejected() {
    let assert = rv32dbg().args(["-b", "--mem-size", "0"]).assert().code(1);
    let err = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(err.contains("--mem-size must be non-zero"), "{err}");
}
