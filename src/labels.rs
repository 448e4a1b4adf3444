// 该文件是 Wuzhi （物识） 项目的一部分。
// src/labels.rs - 标签映射文件解析
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 标签映射（label map）为 protobuf 文本格式：
//!
//! ```text
//! item {
//!   name: "/m/011k07"
//!   id: 1
//!   display_name: "Tortoise"
//! }
//! ```
//!
//! 只解析 `item` 中的 `name`、`id` 与 `display_name`，其余字段原样跳过。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_NUM_CLASSES: usize = 1000;
/// 类别 id 以 u16 解码，更大的类别数没有意义
pub const MAX_NUM_CLASSES: usize = u16::MAX as usize;
const BACKGROUND: &str = "background";

#[derive(Error, Debug)]
pub enum LabelMapError {
  #[error("无法读取标签文件 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("标签文件语法错误（第 {line} 行）: {message}")]
  Syntax { line: usize, message: String },
  #[error("字段 {field} 的值无效: {value}")]
  InvalidValue { field: String, value: String },
  #[error("标签 id 不能为负数: {0}")]
  NegativeId(i64),
  #[error("标签 id 0 保留给 background")]
  ReservedBackground,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMapItem {
  pub name: Option<String>,
  pub id: i64,
  pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelMap {
  items: Vec<LabelMapItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
  pub id: u32,
  pub name: String,
}

/// 以类别 id 为键的有序类别索引
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
  categories: BTreeMap<u32, Category>,
}

impl LabelMap {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LabelMapError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| LabelMapError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::parse(&text)
  }

  pub fn parse(text: &str) -> Result<Self, LabelMapError> {
    let tokens = tokenize(text)?;
    let fields = Parser::new(tokens).parse_document()?;

    let mut items = Vec::new();
    for (key, value) in fields {
      if key != "item" {
        debug!("跳过标签文件顶层字段: {}", key);
        continue;
      }
      match value {
        Value::Message(fields) => items.push(LabelMapItem::from_fields(fields)?),
        _ => {
          return Err(LabelMapError::InvalidValue {
            field: key,
            value: "非消息类型".to_string(),
          });
        }
      }
    }

    let map = Self { items };
    map.validate()?;
    debug!("标签文件共 {} 项", map.items.len());
    Ok(map)
  }

  fn validate(&self) -> Result<(), LabelMapError> {
    for item in &self.items {
      if item.id < 0 {
        return Err(LabelMapError::NegativeId(item.id));
      }
      if item.id == 0
        && item.name.as_deref() != Some(BACKGROUND)
        && item.display_name.as_deref() != Some(BACKGROUND)
      {
        return Err(LabelMapError::ReservedBackground);
      }
    }
    Ok(())
  }

  pub fn items(&self) -> &[LabelMapItem] {
    &self.items
  }

  /// 转换为类别列表
  ///
  /// id 不在 `1..=max_num_classes` 内的项会被跳过；同一 id 只保留第一项。
  /// 空标签映射生成 `category_1` 到 `category_N` 的默认类别。
  /// `max_num_classes` 超过 [`MAX_NUM_CLASSES`] 时按上限处理。
  pub fn to_categories(&self, max_num_classes: usize, use_display_name: bool) -> Vec<Category> {
    let max_num_classes = if max_num_classes > MAX_NUM_CLASSES {
      warn!("最大类别数 {} 超过上限，改用 {}", max_num_classes, MAX_NUM_CLASSES);
      MAX_NUM_CLASSES
    } else {
      max_num_classes
    };
    if self.items.is_empty() {
      return (1..=max_num_classes as u32)
        .map(|id| Category {
          id,
          name: default_category_name(id),
        })
        .collect();
    }

    let mut categories: Vec<Category> = Vec::new();
    for item in &self.items {
      if item.id < 1 || item.id > max_num_classes as i64 {
        info!("忽略标签项 {:?}: id 超出范围 [1, {}]", item.name, max_num_classes);
        continue;
      }
      let id = item.id as u32;
      if categories.iter().any(|c| c.id == id) {
        continue;
      }
      let name = match (&item.display_name, use_display_name) {
        (Some(display_name), true) => display_name.clone(),
        _ => item.name.clone().unwrap_or_default(),
      };
      categories.push(Category { id, name });
    }
    categories
  }
}

impl LabelMapItem {
  fn from_fields(fields: Vec<(String, Value)>) -> Result<Self, LabelMapError> {
    let mut item = LabelMapItem::default();
    for (key, value) in fields {
      match (key.as_str(), value) {
        ("name", Value::Str(s)) => item.name = Some(s),
        ("display_name", Value::Str(s)) => item.display_name = Some(s),
        ("id", Value::Scalar(s)) => {
          item.id = s.parse().map_err(|_| LabelMapError::InvalidValue {
            field: "id".to_string(),
            value: s.clone(),
          })?;
        }
        (field @ ("name" | "display_name" | "id"), other) => {
          return Err(LabelMapError::InvalidValue {
            field: field.to_string(),
            value: format!("{:?}", other),
          });
        }
        _ => {}
      }
    }
    Ok(item)
  }
}

impl CategoryIndex {
  pub fn load<P: AsRef<Path>>(
    path: P,
    max_num_classes: usize,
    use_display_name: bool,
  ) -> Result<Self, LabelMapError> {
    let label_map = LabelMap::load(path)?;
    Ok(Self::from(label_map.to_categories(max_num_classes, use_display_name)))
  }

  pub fn get(&self, id: u32) -> Option<&Category> {
    self.categories.get(&id)
  }

  /// 查询类别名称，索引中不存在的 id 返回默认名称
  pub fn label(&self, id: u32) -> Cow<'_, str> {
    match self.categories.get(&id) {
      Some(category) => Cow::Borrowed(category.name.as_str()),
      None => Cow::Owned(default_category_name(id)),
    }
  }

  pub fn len(&self) -> usize {
    self.categories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Category> {
    self.categories.values()
  }
}

impl From<Vec<Category>> for CategoryIndex {
  fn from(categories: Vec<Category>) -> Self {
    Self {
      categories: categories.into_iter().map(|c| (c.id, c)).collect(),
    }
  }
}

fn default_category_name(id: u32) -> String {
  format!("category_{}", id)
}

// ---- protobuf 文本格式的最小解析器 ----

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Word(String),
  Str(String),
  Open,
  Close,
  Colon,
  Separator,
  ListOpen,
  ListClose,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
  Scalar(String),
  Str(String),
  Message(Vec<(String, Value)>),
  List(Vec<Value>),
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, LabelMapError> {
  let mut tokens = Vec::new();
  let mut chars = text.chars().peekable();
  let mut line = 1;

  while let Some(&c) = chars.peek() {
    match c {
      '\n' => {
        line += 1;
        chars.next();
      }
      c if c.is_whitespace() => {
        chars.next();
      }
      '#' => {
        while let Some(&c) = chars.peek() {
          if c == '\n' {
            break;
          }
          chars.next();
        }
      }
      '{' | '<' => {
        chars.next();
        tokens.push((line, Token::Open));
      }
      '}' | '>' => {
        chars.next();
        tokens.push((line, Token::Close));
      }
      '[' => {
        chars.next();
        tokens.push((line, Token::ListOpen));
      }
      ']' => {
        chars.next();
        tokens.push((line, Token::ListClose));
      }
      ':' => {
        chars.next();
        tokens.push((line, Token::Colon));
      }
      ',' | ';' => {
        chars.next();
        tokens.push((line, Token::Separator));
      }
      '"' | '\'' => {
        let quote = c;
        let start = line;
        chars.next();
        let mut s = String::new();
        loop {
          match chars.next() {
            None | Some('\n') => {
              return Err(LabelMapError::Syntax {
                line: start,
                message: "字符串未闭合".to_string(),
              });
            }
            Some('\\') => match chars.next() {
              Some('n') => s.push('\n'),
              Some('t') => s.push('\t'),
              Some('r') => s.push('\r'),
              Some(other) => s.push(other),
              None => {
                return Err(LabelMapError::Syntax {
                  line: start,
                  message: "转义序列不完整".to_string(),
                });
              }
            },
            Some(c) if c == quote => break,
            Some(c) => s.push(c),
          }
        }
        // 相邻字符串字面量拼接
        if let Some((_, Token::Str(prev))) = tokens.last_mut() {
          prev.push_str(&s);
        } else {
          tokens.push((start, Token::Str(s)));
        }
      }
      c if c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '.') => {
        let mut word = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_alphanumeric() || matches!(c, '_' | '-' | '+' | '.') {
            word.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push((line, Token::Word(word)));
      }
      other => {
        return Err(LabelMapError::Syntax {
          line,
          message: format!("意外字符 '{}'", other),
        });
      }
    }
  }

  Ok(tokens)
}

struct Parser {
  tokens: std::vec::IntoIter<(usize, Token)>,
  peeked: Option<(usize, Token)>,
  line: usize,
}

impl Parser {
  fn new(tokens: Vec<(usize, Token)>) -> Self {
    Self {
      tokens: tokens.into_iter(),
      peeked: None,
      line: 1,
    }
  }

  fn peek(&mut self) -> Option<&Token> {
    if self.peeked.is_none() {
      self.peeked = self.tokens.next();
    }
    self.peeked.as_ref().map(|(_, t)| t)
  }

  fn next(&mut self) -> Option<Token> {
    let next = self.peeked.take().or_else(|| self.tokens.next());
    next.map(|(line, token)| {
      self.line = line;
      token
    })
  }

  fn error(&self, message: impl Into<String>) -> LabelMapError {
    LabelMapError::Syntax {
      line: self.line,
      message: message.into(),
    }
  }

  fn parse_document(&mut self) -> Result<Vec<(String, Value)>, LabelMapError> {
    let fields = self.parse_fields()?;
    match self.next() {
      None => Ok(fields),
      Some(token) => Err(self.error(format!("多余的记号 {:?}", token))),
    }
  }

  fn parse_fields(&mut self) -> Result<Vec<(String, Value)>, LabelMapError> {
    let mut fields = Vec::new();
    while let Some(token) = self.peek() {
      if *token == Token::Close {
        break;
      }
      let key = match self.next() {
        Some(Token::Word(key)) => key,
        Some(other) => return Err(self.error(format!("期望字段名，得到 {:?}", other))),
        None => break,
      };
      if self.peek() == Some(&Token::Colon) {
        self.next();
      }
      let value = self.parse_value()?;
      if self.peek() == Some(&Token::Separator) {
        self.next();
      }
      fields.push((key, value));
    }
    Ok(fields)
  }

  fn parse_value(&mut self) -> Result<Value, LabelMapError> {
    match self.next() {
      Some(Token::Open) => {
        let fields = self.parse_fields()?;
        match self.next() {
          Some(Token::Close) => Ok(Value::Message(fields)),
          _ => Err(self.error("消息未闭合")),
        }
      }
      Some(Token::ListOpen) => {
        let mut values = Vec::new();
        loop {
          if self.peek() == Some(&Token::ListClose) {
            self.next();
            break;
          }
          values.push(self.parse_value()?);
          match self.next() {
            Some(Token::Separator) => continue,
            Some(Token::ListClose) => break,
            _ => return Err(self.error("列表未闭合")),
          }
        }
        Ok(Value::List(values))
      }
      Some(Token::Str(s)) => Ok(Value::Str(s)),
      Some(Token::Word(w)) => Ok(Value::Scalar(w)),
      Some(other) => Err(self.error(format!("期望字段值，得到 {:?}", other))),
      None => Err(self.error("文件意外结束")),
    }
  }
}
