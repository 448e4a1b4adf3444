// 该文件是 Wuzhi （物识） 项目的一部分。
// tests/cli.rs - 命令行行为测试
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::process::Command;

fn wuzhi() -> Command {
  let mut cmd = Command::new(env!("CARGO_BIN_EXE_wuzhi"));
  cmd.env_remove("REDIS_HOST").env_remove("WUZHI_DOWNLOAD_URL");
  cmd
}

#[test]
fn missing_image_argument_exits_with_one() {
  let output = wuzhi().output().unwrap();
  assert_eq!(output.status.code(), Some(1));
  assert_eq!(
    String::from_utf8_lossy(&output.stdout).trim(),
    "Argument required: image file path"
  );
}

#[test]
fn missing_model_files_fail_without_results() {
  let dir = tempfile::tempdir().unwrap();
  let output = wuzhi()
    .arg("image.jpg")
    .arg("--model-dir")
    .arg(dir.path())
    .output()
    .unwrap();
  assert!(!output.status.success());
  assert!(output.stdout.is_empty());
}
