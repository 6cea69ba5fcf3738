use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::debug::json_escape;

/// JSON-lines timing log shared by every pass of one `AnchorFill`.
#[derive(Clone)]
pub(crate) struct PerfLogger {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn log_span_ms(&self, name: &str, pass_id: Option<usize>, ms: f64) {
        self.write_line(&format!(
            "{{\"type\":\"perf.span\",\"name\":\"{}\",\"pass\":{},\"unit\":\"ms\",\"ms\":{:.3}}}",
            json_escape(name),
            pass_field(pass_id),
            ms
        ));
    }

    pub fn log_counts(&self, name: &str, pass_id: Option<usize>, counts: &[(&str, u64)]) {
        let fields: Vec<String> = counts
            .iter()
            .map(|(key, value)| format!("\"{}\":{}", json_escape(key), value))
            .collect();
        self.write_line(&format!(
            "{{\"type\":\"perf.counts\",\"name\":\"{}\",\"pass\":{},\"counts\":{{{}}}}}",
            json_escape(name),
            pass_field(pass_id),
            fields.join(",")
        ));
    }

    pub fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }

    fn write_line(&self, line: &str) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
        }
    }
}

fn pass_field(pass_id: Option<usize>) -> String {
    pass_id
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_spans_and_counts() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!(
            "anchorfill_perf_{}_{}.log",
            std::process::id(),
            nanos
        ));
        let perf = PerfLogger::new(&path).expect("perf logger");
        perf.log_span_ms("anchorfill.resolve", Some(0), 1.5);
        perf.log_span_ms("anchorfill.preprocess", None, 4.0);
        perf.log_counts("anchorfill.pass", Some(0), &[("anchors", 3), ("sources", 2)]);
        perf.flush();

        let text = std::fs::read_to_string(&path).expect("perf log");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3, "log={}", text);
        assert!(lines[0].contains("\"name\":\"anchorfill.resolve\",\"pass\":0"));
        assert!(lines[0].contains("\"ms\":1.500"));
        assert!(lines[1].contains("\"pass\":null"));
        assert!(lines[2].contains("\"counts\":{\"anchors\":3,\"sources\":2}"), "log={}", text);
        let _ = std::fs::remove_file(&path);
    }
}
