//! C-ABI adapter for acquisition software that loads frame decoders
//! as plugins: `plugin_open` / `plugin_get_header` / `plugin_get_data`
//! / `plugin_close`.
//!
//! The ABI allows exactly one open file at a time; the handle lives in
//! a process-global mutex. Errors are reported through the ABI's small
//! negative codes, with the message logged.

use lazy_static::lazy_static;
use libc::{c_char, c_float, c_int};
use std::ffi::CStr;
use std::sync::Mutex;

use log::{debug, error};

use crate::dataset::Dataset;
use crate::error::Error;
use crate::file::H5File;
use crate::messages::DatatypeClass;

const INFO_CUSTOMER_ID: c_int = 1;
const INFO_VERSION_MAJOR: c_int = 0;
const INFO_VERSION_MINOR: c_int = 1;
const INFO_VERSION_PATCH: c_int = 0;

const ERR_USAGE: c_int = -2;
const ERR_DATATYPE: c_int = -3;
const ERR_FILE: c_int = -4;

const MASK_PATH: &str = "/entry/instrument/detector/detectorSpecific/pixel_mask";
const NIMAGES_PATH: &str = "/entry/instrument/detector/detectorSpecific/nimages";
const NTRIGGER_PATH: &str = "/entry/instrument/detector/detectorSpecific/ntrigger";
const X_PIXEL_SIZE_PATH: &str = "/entry/instrument/detector/x_pixel_size";
const Y_PIXEL_SIZE_PATH: &str = "/entry/instrument/detector/y_pixel_size";

struct FrameGeometry {
    dim_x: usize,
    dim_y: usize,
    element_size: usize,
    frames_per_dataset: u64,
    total_frames: u64,
    pixel_mask: Vec<u32>,
    x_pixel_size: f32,
    y_pixel_size: f32,
}

struct PluginState {
    file: H5File,
    geometry: Option<FrameGeometry>,
}

lazy_static! {
    static ref GLOBAL_HANDLE: Mutex<Option<PluginState>> = Mutex::new(None);
}

struct PluginError {
    code: c_int,
    message: String,
}

impl PluginError {
    fn new(code: c_int, message: impl Into<String>) -> Self {
        PluginError {
            code,
            message: message.into(),
        }
    }
}

impl From<Error> for PluginError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::UnsupportedDatatype(_) => ERR_DATATYPE,
            _ => ERR_FILE,
        };
        PluginError::new(code, err.to_string())
    }
}

fn set_info_array(info: *mut c_int) {
    if info.is_null() {
        return;
    }
    let info = unsafe { std::slice::from_raw_parts_mut(info, 1024) };
    info[0] = INFO_CUSTOMER_ID;
    info[1] = INFO_VERSION_MAJOR;
    info[2] = INFO_VERSION_MINOR;
    info[3] = INFO_VERSION_PATCH;
    info[4] = -1; // build timestamp, unused
}

/// Reads a whole small dataset; chunked ones read their first chunk.
fn read_whole(dataset: &Dataset) -> crate::error::Result<Vec<u8>> {
    match dataset.chunk_shape() {
        Some(chunk) => dataset.read(&vec![0; chunk.len()]),
        None => dataset.read(&[]),
    }
}

fn read_scalar_u64(file: &H5File, path: &str) -> Result<u64, PluginError> {
    let dataset = Dataset::open(file, path)?;
    if dataset.datatype_class() != DatatypeClass::FixedPoint {
        return Err(PluginError::new(
            ERR_DATATYPE,
            format!("{path} is not an integer dataset"),
        ));
    }
    let bytes = read_whole(&dataset)?;
    let width = dataset.element_size();
    if bytes.len() < width {
        return Err(PluginError::new(ERR_FILE, format!("{path} is empty")));
    }
    let mut value = 0u64;
    for (i, &b) in bytes[..width.min(8)].iter().enumerate() {
        value |= (b as u64) << (i * 8);
    }
    Ok(value)
}

fn read_scalar_f32(file: &H5File, path: &str) -> Result<f32, PluginError> {
    let dataset = Dataset::open(file, path)?;
    if dataset.datatype_class() != DatatypeClass::FloatingPoint {
        return Err(PluginError::new(
            ERR_DATATYPE,
            format!("{path} is not a float dataset"),
        ));
    }
    let bytes = read_whole(&dataset)?;
    match dataset.element_size() {
        4 => Ok(f32::from_le_bytes(bytes[..4].try_into().map_err(|_| {
            PluginError::new(ERR_FILE, format!("{path} is truncated"))
        })?)),
        8 => Ok(f64::from_le_bytes(bytes[..8].try_into().map_err(|_| {
            PluginError::new(ERR_FILE, format!("{path} is truncated"))
        })?) as f32),
        n => Err(PluginError::new(
            ERR_DATATYPE,
            format!("{path} has an unsupported {n}-byte float"),
        )),
    }
}

fn load_geometry(file: &H5File) -> Result<FrameGeometry, PluginError> {
    // Pixel sizes are optional metadata; the mask and frame counts are not.
    let x_pixel_size = read_scalar_f32(file, X_PIXEL_SIZE_PATH).unwrap_or(0.0);
    let y_pixel_size = read_scalar_f32(file, Y_PIXEL_SIZE_PATH).unwrap_or(0.0);

    let mask_dataset = Dataset::open(file, MASK_PATH)
        .map_err(|e| PluginError::new(ERR_FILE, format!("cannot read pixel mask: {e}")))?;
    if mask_dataset.datatype_class() != DatatypeClass::FixedPoint
        || mask_dataset.element_size() != 4
        || mask_dataset.shape().len() != 2
    {
        return Err(PluginError::new(
            ERR_FILE,
            "pixel mask is not a 2-D u32 dataset",
        ));
    }
    let dim_y = mask_dataset.shape()[0] as usize;
    let dim_x = mask_dataset.shape()[1] as usize;
    let mask_bytes = read_whole(&mask_dataset)?;
    let pixel_mask: Vec<u32> = mask_bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if pixel_mask.len() != dim_x * dim_y {
        return Err(PluginError::new(ERR_FILE, "pixel mask size mismatch"));
    }

    let nimages = read_scalar_u64(file, NIMAGES_PATH)
        .map_err(|e| PluginError::new(e.code, format!("cannot read nimages: {}", e.message)))?;
    let ntrigger = read_scalar_u64(file, NTRIGGER_PATH)
        .map_err(|e| PluginError::new(e.code, format!("cannot read ntrigger: {}", e.message)))?;

    let first = Dataset::open(file, "/entry/data/data_000001")
        .map_err(|e| PluginError::new(ERR_FILE, format!("cannot open first data block: {e}")))?;
    let shape = first.shape();
    if shape.len() != 3 || shape[1] as usize != dim_y || shape[2] as usize != dim_x {
        return Err(PluginError::new(
            ERR_FILE,
            "first data block does not match the pixel mask geometry",
        ));
    }
    if !first.is_chunked() {
        return Err(PluginError::new(ERR_FILE, "data blocks must be chunked"));
    }

    Ok(FrameGeometry {
        dim_x,
        dim_y,
        element_size: first.element_size(),
        frames_per_dataset: shape[0],
        total_frames: nimages * ntrigger,
        pixel_mask,
        x_pixel_size,
        y_pixel_size,
    })
}

/// Path of the data block holding a zero-based global frame number.
fn dataset_path_for_frame(frame: u64, frames_per_dataset: u64) -> String {
    format!("/entry/data/data_{:06}", frame / frames_per_dataset + 1)
}

/// Masked conversion to the ABI's i32 pixels: mask bit 0 marks a dead
/// pixel (-1), bits 1-4 an unreliable one (-2), and values that do not
/// fit i32 saturate to -1.
fn mask_to_i32(value: u64, mask: u32) -> i32 {
    if mask & 0x01 != 0 {
        -1
    } else if mask & 0x1E != 0 {
        -2
    } else if value >= i32::MAX as u64 {
        -1
    } else {
        value as i32
    }
}

fn read_frame(
    state: &PluginState,
    geometry: &FrameGeometry,
    frame_number: c_int,
    out: &mut [c_int],
) -> Result<(), PluginError> {
    if frame_number < 1 {
        return Err(PluginError::new(ERR_USAGE, "frame numbers start from 1"));
    }
    let frame = frame_number as u64 - 1;
    if frame >= geometry.total_frames {
        return Err(PluginError::new(
            ERR_USAGE,
            format!("frame {frame_number} is past the acquisition"),
        ));
    }
    let path = dataset_path_for_frame(frame, geometry.frames_per_dataset);
    let dataset = Dataset::open(&state.file, &path)
        .map_err(|e| PluginError::new(ERR_USAGE, format!("cannot open frame: {e}")))?;
    let frame_in_dataset = frame % geometry.frames_per_dataset;
    if frame_in_dataset >= dataset.shape()[0] {
        return Err(PluginError::new(ERR_USAGE, "frame is past the data block"));
    }
    let raw = dataset
        .read(&[frame_in_dataset, 0, 0])
        .map_err(|e| PluginError::new(ERR_USAGE, format!("cannot read frame: {e}")))?;

    let npixels = geometry.dim_x * geometry.dim_y;
    match geometry.element_size {
        1 => {
            for i in 0..npixels {
                out[i] = mask_to_i32(raw[i] as u64, geometry.pixel_mask[i]);
            }
        }
        2 => {
            for i in 0..npixels {
                let v = u16::from_le_bytes([raw[2 * i], raw[2 * i + 1]]);
                out[i] = mask_to_i32(v as u64, geometry.pixel_mask[i]);
            }
        }
        4 => {
            for i in 0..npixels {
                let v = u32::from_le_bytes([
                    raw[4 * i],
                    raw[4 * i + 1],
                    raw[4 * i + 2],
                    raw[4 * i + 3],
                ]);
                out[i] = mask_to_i32(v as u64, geometry.pixel_mask[i]);
            }
        }
        n => {
            return Err(PluginError::new(
                ERR_DATATYPE,
                format!("unsupported {n}-byte pixels"),
            ));
        }
    }
    Ok(())
}

fn report(error_flag: *mut c_int, result: Result<(), PluginError>) {
    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e.message);
            e.code
        }
    };
    if !error_flag.is_null() {
        unsafe { *error_flag = code };
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn plugin_open(
    filename: *const c_char,
    info_array: *mut c_int,
    error_flag: *mut c_int,
) {
    set_info_array(info_array);
    let result = (|| {
        if filename.is_null() {
            return Err(PluginError::new(ERR_FILE, "null filename"));
        }
        let path = unsafe { CStr::from_ptr(filename) }
            .to_str()
            .map_err(|_| PluginError::new(ERR_FILE, "filename is not valid UTF-8"))?;
        let file = H5File::open(path)
            .map_err(|e| PluginError::new(ERR_FILE, format!("cannot open {path}: {e}")))?;
        let mut handle = GLOBAL_HANDLE.lock().unwrap();
        if handle.is_some() {
            return Err(PluginError::new(ERR_FILE, "a file is already open"));
        }
        debug!("plugin opened {path}");
        *handle = Some(PluginState {
            file,
            geometry: None,
        });
        Ok(())
    })();
    report(error_flag, result);
}

#[unsafe(no_mangle)]
pub extern "C" fn plugin_get_header(
    nx: *mut c_int,
    ny: *mut c_int,
    nbytes: *mut c_int,
    qx: *mut c_float,
    qy: *mut c_float,
    number_of_frames: *mut c_int,
    info: *mut c_int,
    error_flag: *mut c_int,
) {
    set_info_array(info);
    let result = (|| {
        let mut handle = GLOBAL_HANDLE.lock().unwrap();
        let state = handle
            .as_mut()
            .ok_or_else(|| PluginError::new(ERR_USAGE, "no file has been opened yet"))?;
        if state.geometry.is_none() {
            state.geometry = Some(load_geometry(&state.file)?);
        }
        let g = state.geometry.as_ref().ok_or_else(|| {
            PluginError::new(ERR_USAGE, "geometry is unavailable")
        })?;
        unsafe {
            if !nx.is_null() {
                *nx = g.dim_x as c_int;
            }
            if !ny.is_null() {
                *ny = g.dim_y as c_int;
            }
            if !nbytes.is_null() {
                *nbytes = g.element_size as c_int;
            }
            if !qx.is_null() {
                *qx = g.x_pixel_size;
            }
            if !qy.is_null() {
                *qy = g.y_pixel_size;
            }
            if !number_of_frames.is_null() {
                *number_of_frames = g.total_frames as c_int;
            }
        }
        Ok(())
    })();
    report(error_flag, result);
}

#[unsafe(no_mangle)]
pub extern "C" fn plugin_get_data(
    frame_number: *mut c_int,
    nx: *mut c_int,
    ny: *mut c_int,
    data_array: *mut c_int,
    info_array: *mut c_int,
    error_flag: *mut c_int,
) {
    set_info_array(info_array);
    let result = (|| {
        if frame_number.is_null() || data_array.is_null() {
            return Err(PluginError::new(ERR_USAGE, "null frame number or buffer"));
        }
        let mut handle = GLOBAL_HANDLE.lock().unwrap();
        let state = handle
            .as_mut()
            .ok_or_else(|| PluginError::new(ERR_USAGE, "no file has been opened yet"))?;
        if state.geometry.is_none() {
            state.geometry = Some(load_geometry(&state.file)?);
        }
        let geometry = state
            .geometry
            .as_ref()
            .ok_or_else(|| PluginError::new(ERR_USAGE, "geometry is unavailable"))?;
        let out = unsafe {
            std::slice::from_raw_parts_mut(data_array, geometry.dim_x * geometry.dim_y)
        };
        unsafe {
            if !nx.is_null() {
                *nx = geometry.dim_x as c_int;
            }
            if !ny.is_null() {
                *ny = geometry.dim_y as c_int;
            }
        }
        let frame = unsafe { *frame_number };
        read_frame(state, geometry, frame, out)
    })();
    report(error_flag, result);
}

#[unsafe(no_mangle)]
pub extern "C" fn plugin_close(error_flag: *mut c_int) {
    *GLOBAL_HANDLE.lock().unwrap() = None;
    if !error_flag.is_null() {
        unsafe { *error_flag = 0 };
    }
}
