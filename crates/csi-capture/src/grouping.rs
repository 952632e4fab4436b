//! Spatial-stream grouping for nexmon captures.
//!
//! nexmon reports one record per (core, spatial stream) pair, all carrying
//! the sequence number of the frame they were measured on. Grouping turns
//! the flat record list into an index `[frame, core, spatial] → record`.

use ndarray::Array3;

use crate::error::{CsiError, CsiResult};

/// Build the `[frame, core, spatial]` index over a nexmon record list.
///
/// Runs of equal consecutive `seq` form frames. Runs that do not hold
/// exactly `core_count · spatial_count` records are dropped. Inside a frame
/// records are ordered by `core · spatial_count + spatial`, ties keeping
/// their capture order.
pub fn group_spatial_streams(
    seq: &[u16],
    core: &[u8],
    spatial: &[u8],
    core_count: usize,
    spatial_count: usize,
) -> CsiResult<Array3<usize>> {
    if core_count == 0 {
        return Err(CsiError::invalid_config("core_count", "must be at least 1"));
    }
    if spatial_count == 0 {
        return Err(CsiError::invalid_config("spatial_count", "must be at least 1"));
    }
    if core.len() != seq.len() || spatial.len() != seq.len() {
        return Err(CsiError::invalid_config(
            "group",
            format!(
                "seq, core and spatial lengths differ ({}, {}, {})",
                seq.len(),
                core.len(),
                spatial.len()
            ),
        ));
    }

    let per_frame = core_count * spatial_count;
    let mut frames: Vec<Vec<usize>> = Vec::new();
    let mut start = 0;
    while start < seq.len() {
        let end = seq[start..]
            .iter()
            .position(|&s| s != seq[start])
            .map_or(seq.len(), |n| start + n);
        if end - start == per_frame {
            let mut members: Vec<usize> = (start..end).collect();
            members.sort_by_key(|&i| usize::from(core[i]) * spatial_count + usize::from(spatial[i]));
            frames.push(members);
        }
        start = end;
    }

    let mut index = Array3::zeros((frames.len(), core_count, spatial_count));
    for (f, members) in frames.iter().enumerate() {
        for (slot, &record) in members.iter().enumerate() {
            index[[f, slot / spatial_count, slot % spatial_count]] = record;
        }
    }
    Ok(index)
}
