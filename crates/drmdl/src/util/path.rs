use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

pub trait DrmdlPathExt {
    /// Replace the extension with `{tag}.{ext}`.
    ///
    /// `temp_271.mp4` tagged with `enc_video` and `mp4` becomes `temp_271.enc_video.mp4`.
    fn with_tag<T: AsRef<OsStr>>(&self, tag: T, extension: T) -> PathBuf;

    /// Hidden sibling used while a file is still being written.
    fn staging_path(&self) -> PathBuf;
}

impl DrmdlPathExt for Path {
    fn with_tag<T: AsRef<OsStr>>(&self, tag: T, extension: T) -> PathBuf {
        let mut filename = OsString::new();

        // {file_stem}.{tag}.{ext}
        if let Some(file_stem) = self.file_stem() {
            filename.push(file_stem);
        }
        filename.push(".");
        filename.push(tag);
        filename.push(".");
        filename.push(extension);

        self.with_file_name(filename)
    }

    fn staging_path(&self) -> PathBuf {
        let mut filename = OsString::from(".");

        // .{file_stem}.partial.{ext}
        if let Some(file_stem) = self.file_stem() {
            filename.push(file_stem);
        }
        filename.push(".partial");
        if let Some(ext) = self.extension() {
            filename.push(".");
            filename.push(ext);
        }

        self.with_file_name(filename)
    }
}

/// Turn an opaque unit id into a single path component.
pub fn sanitize_component(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}
