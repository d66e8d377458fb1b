//! # ASCII Pretty JSON
//!
//! A `serde_json` formatter for the bundle's JSON files:
//! * two-space indentation, one member per line, `": "` after keys,
//! * every character outside `' '..='~'` escaped as lowercase `\uXXXX`,
//! * astral characters written as UTF-16 surrogate pairs,
//! * no trailing newline.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};

use crate::errors::MZResult;

/// Pretty formatter with ASCII-only string output.
#[derive(Debug)]
pub struct AsciiPrettyFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl Default for AsciiPrettyFormatter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl AsciiPrettyFormatter<'_> {
    /// Two-space indentation.
    pub fn new() -> Self {
        Self {
            inner: PrettyFormatter::with_indent(b"  "),
        }
    }
}

impl Formatter for AsciiPrettyFormatter<'_> {
    fn begin_array<W>(
        &mut self,
        writer: &mut W,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.begin_array(writer)
    }

    fn end_array<W>(
        &mut self,
        writer: &mut W,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W>(
        &mut self,
        writer: &mut W,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W>(
        &mut self,
        writer: &mut W,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.begin_object(writer)
    }

    fn end_object<W>(
        &mut self,
        writer: &mut W,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W>(
        &mut self,
        writer: &mut W,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W>(
        &mut self,
        writer: &mut W,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.inner.end_object_value(writer)
    }

    fn write_string_fragment<W>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..idx])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = idx + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

/// Serialize `value` to `writer` as ASCII pretty JSON.
pub fn to_writer_ascii_pretty<W, T>(
    writer: W,
    value: &T,
) -> MZResult<()>
where
    W: Write,
    T: ?Sized + Serialize,
{
    let mut ser = Serializer::with_formatter(writer, AsciiPrettyFormatter::new());
    value.serialize(&mut ser)?;
    Ok(())
}

/// Serialize `value` to a string as ASCII pretty JSON.
pub fn to_string_ascii_pretty<T>(value: &T) -> MZResult<String>
where
    T: ?Sized + Serialize,
{
    let mut buf = Vec::new();
    to_writer_ascii_pretty(&mut buf, value)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
}

/// Write `value` to `path` as ASCII pretty JSON, replacing any existing file.
pub fn write_json_file<T>(
    path: &Path,
    value: &T,
) -> MZResult<()>
where
    T: ?Sized + Serialize,
{
    let mut writer = BufWriter::new(File::create(path)?);
    to_writer_ascii_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_indented_layout() {
        let value = json!({"a": 1, "b": [true, null], "c": {}, "d": []});
        assert_eq!(
            to_string_ascii_pretty(&value).unwrap(),
            "{\n  \"a\": 1,\n  \"b\": [\n    true,\n    null\n  ],\n  \"c\": {},\n  \"d\": []\n}"
        );
    }

    #[test]
    fn test_ascii_escapes() {
        let mut map = BTreeMap::new();
        map.insert("\u{2581}the", 1);
        map.insert("caf\u{e9}", 2);
        map.insert("\u{1f600}", 3);
        map.insert("tab\t\"q\"\\\u{7f}", 4);

        let text = to_string_ascii_pretty(&map).unwrap();
        assert!(text.is_ascii());
        assert!(text.contains(r#""\u2581the": 1"#));
        assert!(text.contains(r#""caf\u00e9": 2"#));
        assert!(text.contains(r#""\ud83d\ude00": 3"#));
        assert!(text.contains(r#""tab\t\"q\"\\\u007f": 4"#));

        let back: BTreeMap<String, u32> = serde_json::from_str(&text).unwrap();
        assert_eq!(back.get("\u{1f600}"), Some(&3));
    }

    #[test]
    fn test_write_json_file() {
        let dir = tempdir::TempDir::new("mobilize_json").unwrap();
        let path = dir.path().join("x.json");

        write_json_file(&path, &json!({"k": "v"})).unwrap();
        write_json_file(&path, &json!({"k": "w"})).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\n  \"k\": \"w\"\n}");
    }
}
