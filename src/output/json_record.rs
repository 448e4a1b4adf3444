// 该文件是 Wuzhi （物识） 项目的一部分。
// src/output/json_record.rs - JSON 记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::cell::RefCell;
use std::io::Write;

use super::{OutputError, Render};
use crate::model::DetectionRecord;

pub struct JsonRecordOutput<W: Write> {
  writer: RefCell<W>,
  pretty: bool,
}

impl<W: Write> JsonRecordOutput<W> {
  pub fn new(writer: W) -> Self {
    Self {
      writer: RefCell::new(writer),
      pretty: false,
    }
  }

  pub fn pretty(mut self, pretty: bool) -> Self {
    self.pretty = pretty;
    self
  }

  pub fn into_inner(self) -> W {
    self.writer.into_inner()
  }
}

impl<F, W: Write> Render<F, Vec<DetectionRecord>> for JsonRecordOutput<W> {
  type Error = OutputError;

  fn render_result(&self, _frame: &F, result: &Vec<DetectionRecord>) -> Result<(), Self::Error> {
    let mut writer = self.writer.borrow_mut();
    if self.pretty {
      serde_json::to_writer_pretty(&mut *writer, result)?;
    } else {
      serde_json::to_writer(&mut *writer, result)?;
    }
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
  }
}
