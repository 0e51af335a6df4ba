use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::core::DataRecord;

/// Two-frame message body: header frame, then payload frame.
pub type Message = [Vec<u8>; 2];

pub const HEADER_VERSION: u8 = 0;
/// Data-type codes carried in the record header.
pub const DTYPE_INT16: u8 = 2;
pub const DTYPE_UINT16: u8 = 3;

/// Size of the record message's first frame.
pub const RECORD_HEADER_LEN: usize = 36;

pub fn time_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Full-record message. Header layout, little-endian:
/// u16 channel, u8 version, u8 dtype, u32 presamples, u32 nsamples,
/// f32 sample period (s), f32 volts/arb, i64 trigger time (ns),
/// u64 trigger frame. Second frame: the raw samples.
pub fn record_message(rec: &DataRecord) -> Message {
    let mut header = Vec::with_capacity(RECORD_HEADER_LEN);
    header.write_u16::<LittleEndian>(rec.channel_index as u16).unwrap();
    header.write_u8(HEADER_VERSION).unwrap();
    header
        .write_u8(if rec.signed { DTYPE_INT16 } else { DTYPE_UINT16 })
        .unwrap();
    header.write_u32::<LittleEndian>(rec.presamples as u32).unwrap();
    header.write_u32::<LittleEndian>(rec.data.len() as u32).unwrap();
    header.write_f32::<LittleEndian>(rec.samp_period).unwrap();
    header.write_f32::<LittleEndian>(rec.volts_per_arb).unwrap();
    header
        .write_i64::<LittleEndian>(time_nanos(rec.trig_time))
        .unwrap();
    header.write_u64::<LittleEndian>(rec.trig_frame as u64).unwrap();
    debug_assert_eq!(header.len(), RECORD_HEADER_LEN);

    let mut payload = Vec::with_capacity(2 * rec.data.len());
    for &s in &rec.data {
        payload.write_u16::<LittleEndian>(s).unwrap();
    }
    [header, payload]
}

/// Summary message. Header layout, little-endian:
/// u16 channel, u8 version, u32 presamples, u32 nsamples, f32 pretrig mean,
/// f32 peak, f32 RMS, f32 average, f32 residual sigma, i64 trigger time (ns),
/// i64 trigger frame. Second frame: model coefficients as f64 (may be empty).
pub fn summary_message(rec: &DataRecord) -> Message {
    let mut header = Vec::with_capacity(47);
    header.write_u16::<LittleEndian>(rec.channel_index as u16).unwrap();
    header.write_u8(HEADER_VERSION).unwrap();
    header.write_u32::<LittleEndian>(rec.presamples as u32).unwrap();
    header.write_u32::<LittleEndian>(rec.data.len() as u32).unwrap();
    header.write_f32::<LittleEndian>(rec.pretrig_mean as f32).unwrap();
    header.write_f32::<LittleEndian>(rec.peak_value as f32).unwrap();
    header.write_f32::<LittleEndian>(rec.pulse_rms as f32).unwrap();
    header.write_f32::<LittleEndian>(rec.pulse_average as f32).unwrap();
    header
        .write_f32::<LittleEndian>(rec.residual_std_dev as f32)
        .unwrap();
    header
        .write_i64::<LittleEndian>(time_nanos(rec.trig_time))
        .unwrap();
    header.write_i64::<LittleEndian>(rec.trig_frame).unwrap();

    let mut payload = Vec::with_capacity(8 * rec.model_coefs.len());
    for &c in &rec.model_coefs {
        payload.write_f64::<LittleEndian>(c).unwrap();
    }
    [header, payload]
}
