//! Raw tensor frame: `[ndim u32 BE][dim u64 BE x ndim][f32 payload]`.

use ndarray::{ArrayD, IxDyn};

use crate::StoreError;

/// Encodes a tensor into its wire frame.
pub fn encode(tensor: &ArrayD<f32>) -> Vec<u8> {
    let dims = tensor.shape();
    let mut frame = Vec::with_capacity(4 + dims.len() * 8 + tensor.len() * 4);

    frame.extend_from_slice(&(dims.len() as u32).to_be_bytes());
    for &dim in dims {
        frame.extend_from_slice(&(dim as u64).to_be_bytes());
    }

    match tensor.as_slice() {
        Some(data) => frame.extend_from_slice(bytemuck::cast_slice(data)),
        // non-standard layouts are copied element by element
        None => frame.extend(tensor.iter().flat_map(|v| v.to_ne_bytes())),
    }

    frame
}

/// Decodes a wire frame back into a tensor.
pub fn decode(key: &str, frame: &[u8]) -> Result<ArrayD<f32>, StoreError> {
    parse(frame).ok_or_else(|| StoreError::Corrupt {
        key: key.to_string(),
        reason: "malformed tensor frame".to_string(),
    })
}

fn parse(frame: &[u8]) -> Option<ArrayD<f32>> {
    let mut offset = 0;

    let ndim = u32::from_be_bytes(take(frame, &mut offset, 4)?.try_into().ok()?) as usize;
    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        dims.push(u64::from_be_bytes(take(frame, &mut offset, 8)?.try_into().ok()?) as usize);
    }

    let payload = frame.get(offset..)?;
    let elements: usize = dims.iter().product();
    if payload.len() != elements * 4 {
        return None;
    }

    let mut data = vec![0f32; elements];
    bytemuck::cast_slice_mut(&mut data).copy_from_slice(payload);
    ArrayD::from_shape_vec(IxDyn(&dims), data).ok()
}

fn take<'a>(frame: &'a [u8], offset: &mut usize, len: usize) -> Option<&'a [u8]> {
    let slice = frame.get(*offset..*offset + len)?;
    *offset += len;
    Some(slice)
}
