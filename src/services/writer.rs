use crate::errors::Result;
use log::debug;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// 落盘记录的种类，决定文件名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    PriceHistory,
    Message,
    Reply,
    RawCsv,
    RawJson,
    RawHtml,
}

/// 按股票分目录写文件，每次写入都是整文件覆盖
pub struct RecordWriter {
    output_dir: PathBuf,
}

impl RecordWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// 记录对应的文件路径（由 symbol、种类和 id 推导）
    pub fn path_for(&self, symbol: &str, kind: RecordKind, id: &str) -> PathBuf {
        let symbol = sanitize(symbol);
        let id = sanitize(id);
        match kind {
            RecordKind::PriceHistory => self.output_dir.join(format!("{}_historical_data.csv", symbol)),
            RecordKind::Message => self.output_dir.join(&symbol).join(format!("message_{}.json", id)),
            RecordKind::Reply => self.output_dir.join(&symbol).join(format!("reply_{}.json", id)),
            RecordKind::RawCsv => self.raw_dir().join(format!("{}_raw_csv_response.txt", symbol)),
            RecordKind::RawJson => self.raw_dir().join(format!("{}_raw_json_response.txt", symbol)),
            RecordKind::RawHtml => self.raw_dir().join(format!("{}_raw_html_response.txt", symbol)),
        }
    }

    fn raw_dir(&self) -> PathBuf {
        self.output_dir.join("raw")
    }

    /// 写入一条记录
    ///
    /// 先写同目录下的临时文件再重命名，单个文件不会出现写了一半的内容。
    pub fn write(&self, symbol: &str, kind: RecordKind, id: &str, payload: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(self.output_dir.join(sanitize(symbol)))?;

        let path = self.path_for(symbol, kind, id);
        let dir = path.parent().unwrap_or(&self.output_dir);
        fs::create_dir_all(dir)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = dir.join(format!(".{}.tmp", file_name));

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(payload)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!("Wrote {} bytes to {}", payload.len(), path.display());
        Ok(path)
    }

    /// 以两空格缩进写 JSON，非 ASCII 字符原样保留
    pub fn write_json<T: Serialize>(&self, symbol: &str, kind: RecordKind, id: &str, record: &T) -> Result<PathBuf> {
        let payload = serde_json::to_vec_pretty(record)?;
        self.write(symbol, kind, id, &payload)
    }
}

// 文件名里只保留字母数字、'-' 和 '_'
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
