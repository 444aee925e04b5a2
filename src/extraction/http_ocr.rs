// 该文件是 Chepai （车牌哨兵） 项目的一部分。
// src/extraction/http_ocr.rs - HTTP OCR 服务客户端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 把产物图片以 base64 JSON 的形式 POST 给 OCR 服务。
//!
//! 请求：`{"imageBase64": "..."}`
//! 响应：`{"placas": ["ABC1D23"]}`，或只有原始文本 `{"text": "..."}`，后者经过车牌候选过滤。

use std::time::Duration;

use base64::Engine;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{ExtractionError, Extractor, PlateFilter};
use crate::artifact::Artifact;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OcrRequest<'a> {
  image_base64: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct OcrResponse {
  #[serde(default)]
  placas: Vec<String>,
  #[serde(default)]
  text: Option<String>,
}

pub struct HttpOcrExtractor {
  endpoint: Url,
  client: Option<Client>,
  filter: PlateFilter,
}

impl HttpOcrExtractor {
  pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, ExtractionError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ExtractionError::Transport(e.to_string()))?;
    Ok(Self {
      endpoint,
      client: Some(client),
      filter: PlateFilter::new()?,
    })
  }

  fn plate_from_response(&self, response: OcrResponse) -> Option<String> {
    let direct = response
      .placas
      .into_iter()
      .map(|p| p.trim().to_string())
      .find(|p| !p.is_empty());
    direct.or_else(|| {
      response
        .text
        .as_deref()
        .and_then(|text| self.filter.candidate(text))
    })
  }
}

impl Extractor for HttpOcrExtractor {
  fn extract(&mut self, artifact: &Artifact) -> Result<Option<String>, ExtractionError> {
    let client = self
      .client
      .as_ref()
      .ok_or_else(|| ExtractionError::Transport("会话已关闭".to_string()))?;

    let bytes = std::fs::read(&artifact.path)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

    debug!("提交识别请求: {} -> {}", artifact.id, self.endpoint);
    let response = client
      .post(self.endpoint.clone())
      .json(&OcrRequest {
        image_base64: &encoded,
      })
      .send()
      .map_err(|e| ExtractionError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      return Err(ExtractionError::Transport(format!("HTTP {}", status)));
    }

    let body: OcrResponse = response
      .json()
      .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))?;
    Ok(self.plate_from_response(body))
  }

  fn shutdown(&mut self) {
    self.client = None;
  }
}
