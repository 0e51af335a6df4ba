use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::SystemTime;

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::error::Result;

/// LJH version 2.2 pulse-record writer. Files are created lazily: nothing
/// touches the disk until the first record arrives.
pub struct LjhWriter {
    pub channel_index: usize,
    pub channel_name: String,
    pub channel_number: usize,
    pub presamples: usize,
    pub samples: usize,
    pub frames_per_sample: i64,
    /// Seconds per sample.
    pub timebase: f64,
    pub number_of_rows: usize,
    pub number_of_columns: usize,
    pub number_of_channels: usize,
    pub row_number: usize,
    pub column_number: usize,
    pub source_name: String,
    pub filename: PathBuf,

    file: Option<BufWriter<File>>,
    header_written: bool,
    records_written: usize,
}

impl LjhWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel_index: usize,
        channel_name: String,
        channel_number: usize,
        presamples: usize,
        samples: usize,
        frames_per_sample: i64,
        timebase: f64,
        number_of_rows: usize,
        number_of_columns: usize,
        number_of_channels: usize,
        row_number: usize,
        column_number: usize,
        source_name: String,
        filename: PathBuf,
    ) -> Self {
        LjhWriter {
            channel_index,
            channel_name,
            channel_number,
            presamples,
            samples,
            frames_per_sample,
            timebase,
            number_of_rows,
            number_of_columns,
            number_of_channels,
            row_number,
            column_number,
            source_name,
            filename,
            file: None,
            header_written: false,
            records_written: 0,
        }
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
        let f = self.file.as_mut().expect("create_file before write_header");
        let now: DateTime<Utc> = SystemTime::now().into();
        write!(
            f,
            "#LJH Memorial File Format\r\n\
             Format Version: 2.2.0\r\n\
             Save File Format Version: 2.2.0\r\n\
             Software Version: TESDAQ\r\n\
             Data source: {}\r\n\
             Number of columns: {}\r\n\
             Number of rows: {}\r\n\
             Number of channels: {}\r\n\
             Channel: {}\r\n\
             Channel name: {}\r\n\
             Column number (from 0-{}): {}\r\n\
             Row number (from 0-{}): {}\r\n\
             Timebase: {:e}\r\n\
             Number of samples per point: {}\r\n\
             Presamples: {}\r\n\
             Total Samples: {}\r\n\
             Timestamp offset (s): {:.6}\r\n\
             #End of Header\r\n",
            self.source_name,
            self.number_of_columns,
            self.number_of_rows,
            self.number_of_channels,
            self.channel_number,
            self.channel_name,
            self.number_of_columns.saturating_sub(1),
            self.column_number,
            self.number_of_rows.saturating_sub(1),
            self.row_number,
            self.timebase,
            self.frames_per_sample,
            self.presamples,
            self.samples,
            now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 * 1e-6,
        )?;
        self.header_written = true;
        Ok(())
    }

    /// One record: frame index, trigger time in microseconds since the
    /// epoch, then the raw samples, all little-endian.
    pub fn write_record(&mut self, frame: i64, time_us: i64, samples: &[u16]) -> Result<()> {
        let f = self.file.as_mut().expect("create_file before write_record");
        f.write_i64::<LittleEndian>(frame)?;
        f.write_i64::<LittleEndian>(time_us)?;
        for &s in samples {
            f.write_u16::<LittleEndian>(s)?;
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

/// LJH version 3 writer. Same lazy-creation contract as `LjhWriter`, with
/// variable-length records carrying their own pre-trigger sample count.
pub struct Ljh3Writer {
    pub channel_index: usize,
    pub timebase: f64,
    pub number_of_rows: usize,
    pub number_of_columns: usize,
    pub filename: PathBuf,

    file: Option<BufWriter<File>>,
    header_written: bool,
    records_written: usize,
}

impl Ljh3Writer {
    pub fn new(
        channel_index: usize,
        timebase: f64,
        number_of_rows: usize,
        number_of_columns: usize,
        filename: PathBuf,
    ) -> Self {
        Ljh3Writer {
            channel_index,
            timebase,
            number_of_rows,
            number_of_columns,
            filename,
            file: None,
            header_written: false,
            records_written: 0,
        }
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
        let f = self.file.as_mut().expect("create_file before write_header");
        write!(
            f,
            "#LJH3\r\n\
             Format Version: 3.0.0\r\n\
             Channel: {}\r\n\
             Timebase: {:e}\r\n\
             Number of columns: {}\r\n\
             Number of rows: {}\r\n\
             #End of Header\r\n",
            self.channel_index, self.timebase, self.number_of_columns, self.number_of_rows,
        )?;
        self.header_written = true;
        Ok(())
    }

    /// One record: index of the first rising sample, frame index, trigger
    /// time in microseconds, then the samples, little-endian.
    pub fn write_record(
        &mut self,
        first_rising_sample: u32,
        frame: i64,
        time_us: i64,
        samples: &[u16],
    ) -> Result<()> {
        let f = self.file.as_mut().expect("create_file before write_record");
        f.write_u32::<LittleEndian>(samples.len() as u32)?;
        f.write_u32::<LittleEndian>(first_rising_sample)?;
        f.write_i64::<LittleEndian>(frame)?;
        f.write_i64::<LittleEndian>(time_us)?;
        for &s in samples {
            f.write_u16::<LittleEndian>(s)?;
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
