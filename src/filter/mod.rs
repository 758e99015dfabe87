//! Stream filter: buffers a character stream looking for a `start_str`
//! marker, passes everything from there up to (but not including) a
//! `stop_str` marker, then buffers again waiting for the next `start_str`
//! — each re-entry into the shown state starts a new entry in `outputs`.
//! `InvertedFilter` does the opposite: it suppresses the marked span and
//! passes everything outside it, without re-toggling back to suppressing.
//!
//! Ported from `examples/original_source/src/interpolation_engine/filter.py`
//! (`filter`/`inverted_filter`), which this crate's `chat` task (§4.8) uses
//! to implement the `extract`/`hide` delta post-processing steps.

/// How much of `buf` is safe to flush without risking a split marker across
/// a future chunk boundary: everything up to (but not including) the
/// longest suffix of `buf` that is itself a prefix of `next_str`. Mirrors
/// `filter.py`'s `for safebelow in range(...): if next_str.startswith(...)`.
fn safebelow(buf: &str, next_str: &str) -> usize {
    if next_str.is_empty() {
        return buf.len();
    }
    for start in 0..buf.len() {
        if !buf.is_char_boundary(start) {
            continue;
        }
        let tail = &buf[start..];
        let probe = if tail.len() > next_str.len() { &tail[..next_str.len()] } else { tail };
        if next_str.starts_with(probe) {
            return start;
        }
    }
    buf.len()
}

/// Forward filter: text between `start_str` and `stop_str` passes through,
/// toggling back to hidden at each `stop_str` and back to shown at the next
/// `start_str`. Every transition into the shown state starts a new entry in
/// [`outputs`](StreamFilter::outputs). If either `start_str` or `stop_str`
/// is empty the filter degenerates into pure passthrough (no enumeration
/// header is ever emitted), matching `filter.py`'s `start_str == '' or
/// stop_str == ''` branch.
#[derive(Debug, Clone)]
pub struct StreamFilter {
    start: String,
    stop: String,
    passthrough: bool,
    buf: String,
    shown: bool,
    enumerate_outputs: bool,
    outputs: Vec<String>,
}

impl StreamFilter {
    pub fn new(start_str: impl Into<String>, stop_str: impl Into<String>, enumerate_outputs: bool) -> Self {
        let start = start_str.into();
        let stop = stop_str.into();
        let passthrough = start.is_empty() || stop.is_empty();
        Self {
            start,
            stop,
            passthrough,
            buf: String::new(),
            shown: false,
            enumerate_outputs,
            outputs: Vec::new(),
        }
    }

    /// Feed the next delta chunk; returns the (possibly empty) text to
    /// emit downstream for this chunk.
    pub fn update(&mut self, chunk: &str) -> String {
        if self.passthrough {
            if self.outputs.is_empty() {
                self.outputs.push(String::new());
            }
            self.outputs.last_mut().unwrap().push_str(chunk);
            return chunk.to_string();
        }

        self.buf.push_str(chunk);
        let next_str = if self.shown { &self.stop } else { &self.start };
        let mut enumeration = String::new();

        if self.buf.starts_with(next_str.as_str()) {
            self.buf.drain(..next_str.len());
            self.shown = !self.shown;
            if self.shown {
                self.outputs.push(String::new());
                if self.enumerate_outputs {
                    if self.outputs.len() > 1 {
                        enumeration.push_str("\n\n");
                    }
                    enumeration.push_str(&format!("{}. ", self.outputs.len()));
                }
            }
        }

        let next_str = if self.shown { &self.stop } else { &self.start };
        let cut = safebelow(&self.buf, next_str);
        let delta: String = if self.shown { self.buf[..cut].to_string() } else { String::new() };
        self.buf.drain(..cut);

        if self.shown {
            self.outputs.last_mut().unwrap().push_str(&delta);
        }

        enumeration.push_str(&delta);
        enumeration
    }

    /// Every output shown so far, each one the text between a `start_str`
    /// and its matching `stop_str` (markers stripped).
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}

/// Inverted filter: everything *outside* the `[start, stop)` span passes
/// through; the marked span itself (and the markers) are swallowed. Used
/// for the chat task's `hide` step (spec.md §4.8 step 4). An empty
/// `start_str`/`stop_str` never matches (mirrors `filter.py`'s `next_str
/// != ''` guard), so an empty `start_str` means nothing is ever hidden and
/// an empty `stop_str` means a span, once entered, is hidden forever.
#[derive(Debug, Clone)]
pub struct InvertedFilter {
    start: String,
    stop: String,
    buf: String,
    shown: bool,
}

impl InvertedFilter {
    pub fn new(start_str: impl Into<String>, stop_str: impl Into<String>) -> Self {
        Self {
            start: start_str.into(),
            stop: stop_str.into(),
            buf: String::new(),
            shown: true,
        }
    }

    pub fn update(&mut self, chunk: &str) -> String {
        self.buf.push_str(chunk);
        let next_str = if self.shown { &self.start } else { &self.stop };

        if !next_str.is_empty() && self.buf.starts_with(next_str.as_str()) {
            self.buf.drain(..next_str.len());
            self.shown = !self.shown;
        }

        let next_str = if self.shown { &self.start } else { &self.stop };
        let cut = safebelow(&self.buf, next_str);
        let delta: String = if self.shown { self.buf[..cut].to_string() } else { String::new() };
        self.buf.drain(..cut);
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_start_empty() {
        let mut f = StreamFilter::new("", "", false);
        assert_eq!(f.update("hello "), "hello ");
        assert_eq!(f.update("world"), "world");
        assert_eq!(f.outputs(), &["hello world".to_string()]);
    }

    #[test]
    fn extracts_between_markers() {
        let mut f = StreamFilter::new("<a>", "</a>", false);
        let mut out = String::new();
        out.push_str(&f.update("junk <a>keep"));
        out.push_str(&f.update(" me</a>tail"));
        assert_eq!(out, "keep me");
        assert_eq!(f.outputs(), &["keep me".to_string()]);
    }

    #[test]
    fn handles_marker_split_across_chunks() {
        let mut f = StreamFilter::new("<a>", "</a>", false);
        let mut out = String::new();
        out.push_str(&f.update("pre<"));
        out.push_str(&f.update("a>body<"));
        out.push_str(&f.update("/a>"));
        assert_eq!(out, "body");
    }

    /// Toggles back to shown on a second `<output>`, accumulating a second
    /// entry in `outputs` and a 1-based enumeration header on the visible
    /// text (spec.md §4.1, `filter.py`'s `update()`).
    #[test]
    fn toggles_and_enumerates_multiple_outputs() {
        let mut f = StreamFilter::new("<output>", "</output>", true);
        let mut visible = String::new();
        for c in "<output>1</output>\n\n\t<output>and 2</output>".chars() {
            visible.push_str(&f.update(&c.to_string()));
        }
        assert_eq!(visible, "1. 1\n\n2. and 2");
        assert_eq!(f.outputs(), &["1".to_string(), "and 2".to_string()]);
    }

    #[test]
    fn enumeration_header_on_empty_first_delta() {
        let mut f = StreamFilter::new("", "", true);
        let first = f.update("");
        assert_eq!(first, "");
    }

    #[test]
    fn inverted_filter_hides_span() {
        let mut f = InvertedFilter::new("<think>", "</think>");
        let mut out = String::new();
        out.push_str(&f.update("keep <think>hide"));
        out.push_str(&f.update(" me</think> tail"));
        assert_eq!(out, "keep  tail");
    }

    #[test]
    fn inverted_filter_passthrough_when_start_empty() {
        let mut f = InvertedFilter::new("", "");
        assert_eq!(f.update("anything"), "anything");
    }
}
