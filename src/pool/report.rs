//! Diagnostics - read-only views over a pool's block chain
//!
//! Snapshots are taken under the pool lock and rendered afterwards, so a
//! visitor may call back into the pool without deadlocking.

use std::io::{self, Write};

use super::header::HEADER_SIZE;
use super::segment::Segment;
use super::PoolPtr;

/// One segment as seen by a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Ordinal in the growth history (0 = first store)
    pub id: usize,
    /// Total capacity including headers
    pub size: usize,
    /// Whether a coalescing pass could find work
    pub dirty: bool,
}

/// One block as seen by a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub ptr: PoolPtr,
    /// Payload bytes, header excluded
    pub size: usize,
    pub busy: bool,
    pub locked: bool,
}

/// Aggregate occupancy figures across the whole chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub segments: usize,
    pub capacity: usize,
    pub blocks: usize,
    pub busy_blocks: usize,
    pub locked_blocks: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    /// Bytes consumed by block headers
    pub overhead: usize,
}

pub(crate) struct SegmentSnapshot {
    pub info: SegmentInfo,
    pub blocks: Vec<BlockInfo>,
}

impl SegmentSnapshot {
    pub fn capture(segment: &Segment) -> Self {
        let blocks = segment
            .blocks()
            .filter_map(|(offset, header)| {
                Some(BlockInfo {
                    ptr: PoolPtr::from_addr(segment.payload_addr(offset))?,
                    size: header.size,
                    busy: header.is_busy(),
                    locked: header.is_locked(),
                })
            })
            .collect();

        Self {
            info: SegmentInfo {
                id: segment.id(),
                size: segment.size(),
                dirty: segment.is_dirty(),
            },
            blocks,
        }
    }
}

pub(crate) fn collect_stats(snapshots: &[SegmentSnapshot]) -> PoolStats {
    let mut stats = PoolStats {
        segments: snapshots.len(),
        ..PoolStats::default()
    };

    for snapshot in snapshots {
        stats.capacity += snapshot.info.size;
        for block in &snapshot.blocks {
            stats.blocks += 1;
            stats.overhead += HEADER_SIZE;
            if block.busy {
                stats.busy_blocks += 1;
                stats.used_bytes += block.size;
                if block.locked {
                    stats.locked_blocks += 1;
                }
            } else {
                stats.free_bytes += block.size;
                stats.largest_free = stats.largest_free.max(block.size);
            }
        }
    }
    stats
}

fn block_glyph(block: &BlockInfo) -> char {
    match (block.busy, block.locked) {
        (true, true) => 'L',
        (true, false) => '#',
        _ => '.',
    }
}

fn percent(part: usize, whole: usize) -> usize {
    if whole == 0 {
        0
    } else {
        part * 100 / whole
    }
}

/// Occupancy bar for a whole segment, each cell colored by the block covering it.
fn segment_bar(snapshot: &SegmentSnapshot, width: usize) -> String {
    let size = snapshot.info.size.max(1);
    let mut bar = String::with_capacity(width);
    let mut blocks = snapshot.blocks.iter();
    let mut block_end = 0;
    let mut glyph = '?';

    for cell in 0..width {
        let pos = (cell * size + size / 2) / width;
        while pos >= block_end {
            match blocks.next() {
                Some(block) => {
                    block_end += HEADER_SIZE + block.size;
                    glyph = block_glyph(block);
                }
                None => {
                    glyph = ' ';
                    break;
                }
            }
        }
        bar.push(glyph);
    }
    bar
}

pub(crate) fn render<W: Write>(
    out: &mut W,
    snapshots: &[SegmentSnapshot],
    bar_width: usize,
) -> io::Result<()> {
    let width = bar_width.max(1);

    for snapshot in snapshots {
        let stats = collect_stats(std::slice::from_ref(snapshot));
        writeln!(
            out,
            "pool #{}: {} bytes, {} blocks, {} used ({}%), {} free{}",
            snapshot.info.id,
            snapshot.info.size,
            stats.blocks,
            stats.used_bytes,
            percent(stats.used_bytes, snapshot.info.size),
            stats.free_bytes,
            if snapshot.info.dirty { ", dirty" } else { "" },
        )?;
        writeln!(out, "  [{}]", segment_bar(snapshot, width))?;

        for block in &snapshot.blocks {
            let cells = (block.size * width).div_ceil(snapshot.info.size.max(1));
            let bar: String = std::iter::repeat(block_glyph(block))
                .take(cells.min(width))
                .collect();
            writeln!(
                out,
                "  {:#014x} {:>10} {:<6} |{:<width$}|",
                block.ptr.addr(),
                block.size,
                match (block.busy, block.locked) {
                    (true, true) => "locked",
                    (true, false) => "busy",
                    _ => "free",
                },
                bar,
                width = width,
            )?;
        }
    }

    let total = collect_stats(snapshots);
    writeln!(out, "segments:     {}", total.segments)?;
    writeln!(out, "capacity:     {}", total.capacity)?;
    writeln!(
        out,
        "used:         {} ({}%) in {} blocks, {} locked",
        total.used_bytes,
        percent(total.used_bytes, total.capacity),
        total.busy_blocks,
        total.locked_blocks,
    )?;
    writeln!(out, "free:         {}", total.free_bytes)?;
    writeln!(out, "largest free: {}", total.largest_free)?;
    writeln!(out, "overhead:     {}", total.overhead)?;
    Ok(())
}
