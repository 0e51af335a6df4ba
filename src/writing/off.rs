use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::core::Dense;
use crate::error::{Error, Result};

/// Metadata block serialized as the OFF file's JSON header.
#[derive(Debug, Serialize)]
struct OffHeader<'a> {
    #[serde(rename = "FileFormat")]
    file_format: &'static str,
    #[serde(rename = "FileFormatVersion")]
    version: &'static str,
    #[serde(rename = "ChannelIndex")]
    channel_index: usize,
    #[serde(rename = "ChannelName")]
    channel_name: &'a str,
    #[serde(rename = "NumberOfBases")]
    nbases: usize,
    #[serde(rename = "RecordSamples")]
    samples: usize,
    #[serde(rename = "RecordPresamples")]
    presamples: usize,
    #[serde(rename = "Timebase")]
    timebase: f64,
    #[serde(rename = "ModelDescription")]
    model_description: &'a str,
    #[serde(rename = "ProjectorsBase64")]
    projectors: String,
    #[serde(rename = "BasisBase64")]
    basis: String,
}

/// OFF ("off-line filtered") writer: per-record model coefficients instead
/// of raw samples. Lazy like the LJH writers.
pub struct OffWriter {
    pub channel_index: usize,
    pub channel_name: String,
    pub presamples: usize,
    pub samples: usize,
    pub timebase: f64,
    pub model_description: String,
    pub filename: PathBuf,
    nbases: usize,
    header_json: String,

    file: Option<BufWriter<File>>,
    header_written: bool,
    records_written: usize,
}

impl OffWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_index: usize,
        channel_name: String,
        presamples: usize,
        samples: usize,
        timebase: f64,
        projectors: &Dense,
        basis: &Dense,
        model_description: String,
        filename: PathBuf,
    ) -> Self {
        let header = OffHeader {
            file_format: "OFF",
            version: "0.3.0",
            channel_index,
            channel_name: &channel_name,
            nbases: projectors.rows(),
            samples,
            presamples,
            timebase,
            model_description: &model_description,
            projectors: projectors.to_base64(),
            basis: basis.to_base64(),
        };
        let header_json =
            serde_json::to_string_pretty(&header).expect("OFF header serializes");
        OffWriter {
            channel_index,
            channel_name,
            presamples,
            samples,
            timebase,
            model_description,
            filename,
            nbases: projectors.rows(),
            header_json,
            file: None,
            header_written: false,
            records_written: 0,
        }
    }

    pub fn nbases(&self) -> usize {
        self.nbases
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn create_file(&mut self) -> Result<()> {
        let file = File::create(&self.filename)?;
        self.file = Some(BufWriter::new(file));
        Ok(())
    }

    pub fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Err(Error::config("OFF header already written"));
        }
        let f = self.file.as_mut().expect("create_file before write_header");
        f.write_all(self.header_json.as_bytes())?;
        f.write_all(b"\n")?;
        self.header_written = true;
        Ok(())
    }

    /// One record: presamples, frame index, trigger time in microseconds,
    /// then the `nbases` model coefficients, little-endian.
    pub fn write_record(
        &mut self,
        presamples: i32,
        frame: i64,
        time_us: i64,
        coefs: &[f32],
    ) -> Result<()> {
        if coefs.len() != self.nbases {
            return Err(Error::config(format!(
                "OFF record has {} coefficients, want {}",
                coefs.len(),
                self.nbases
            )));
        }
        let f = self.file.as_mut().expect("create_file before write_record");
        f.write_i32::<LittleEndian>(presamples)?;
        f.write_i64::<LittleEndian>(frame)?;
        f.write_i64::<LittleEndian>(time_us)?;
        for &c in coefs {
            f.write_f32::<LittleEndian>(c)?;
        }
        self.records_written += 1;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut f) = self.file.take() {
            let _ = f.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> OffWriter {
        let projectors = Dense::new(3, 4, vec![0.0; 12]).unwrap();
        let basis = Dense::new(4, 3, vec![0.0; 12]).unwrap();
        OffWriter::new(
            0,
            "chan0".into(),
            100,
            200,
            9.6e-6,
            &projectors,
            &basis,
            "dummy model".into(),
            dir.path().join("chan0.off"),
        )
    }

    #[test]
    fn header_once_then_fixed_size_records() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir);
        w.create_file().unwrap();
        assert!(!w.header_written());
        w.write_header().unwrap();
        assert!(w.header_written());
        assert!(w.write_header().is_err());
        w.close();
        let header_size = fs::metadata(dir.path().join("chan0.off")).unwrap().len();

        w.create_file().unwrap();
        w.header_written = false;
        w.write_header().unwrap();
        w.write_record(100, 7, 8, &[0.0; 3]).unwrap();
        w.close();
        let total = fs::metadata(dir.path().join("chan0.off")).unwrap().len();
        assert_eq!(total, header_size + 4 + 8 + 8 + 4 * 3);
        assert_eq!(w.records_written(), 1);
    }

    #[test]
    fn wrong_coefficient_count_rejected() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir);
        w.create_file().unwrap();
        w.write_header().unwrap();
        assert!(w.write_record(100, 0, 0, &[0.0; 10]).is_err());
    }
}
