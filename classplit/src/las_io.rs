//! Raw LAS/LAZ file handling.
//!
//! Files are loaded completely into memory: raw header, raw VLR records, the
//! (decompressed) point records as one contiguous byte buffer, and the EVLR
//! bytes verbatim. Writing patches only the classification byte of each point
//! record, every other byte is carried over unchanged. That way all point
//! attributes survive the split bit-identically, including attributes of
//! formats or extra bytes this tool knows nothing about.

use crate::classify::ClassId;
use las::point::Format;
use las::raw::{Header, Vlr};
use laz::{LasZipCompressor, LasZipDecompressor, LasZipError, LazVlr};
use log::debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LasIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Bad LAS file: {desc}")]
    FileFormat { desc: String },
}

impl From<LasZipError> for LasIoError {
    fn from(value: LasZipError) -> Self {
        match value {
            LasZipError::IoError(e) => LasIoError::Io(e),
            e => LasIoError::FileFormat {
                desc: format!("{e}"),
            },
        }
    }
}

impl From<las::Error> for LasIoError {
    fn from(value: las::Error) -> Self {
        match value {
            las::Error::Io(e) => LasIoError::Io(e),
            e => LasIoError::FileFormat {
                desc: format!("{e}"),
            },
        }
    }
}

/// A fully loaded LAS or LAZ file.
pub struct PointCloudFile {
    header: Header,
    vlrs: Vec<Vlr>,
    vlr_padding: Vec<u8>,
    point_data: Vec<u8>,
    evlr_data: Vec<u8>,

    /// The parsed laszip VLR. Present iff the source is compressed; reused
    /// for recompression so the output keeps the source's compression
    /// parameters.
    laz_vlr: Option<LazVlr>,

    format_id: u8,
    stride: usize,
    nr_points: usize,
}

impl PointCloudFile {
    pub fn open(path: &Path) -> Result<Self, LasIoError> {
        let mut read = BufReader::new(File::open(path)?);
        let header = Header::read_from(&mut read)?;
        let format = Format::new(header.point_data_record_format)?;
        let format_id = format.to_u8()?;
        let stride = header.point_data_record_length as usize;
        if stride < format.len() as usize {
            return Err(LasIoError::FileFormat {
                desc: format!(
                    "Point record length {} is shorter than the {} bytes of point format {}.",
                    stride,
                    format.len(),
                    format_id
                ),
            });
        }
        let nr_points = header
            .large_file
            .as_ref()
            .map(|large| large.number_of_point_records as usize)
            .unwrap_or(header.number_of_point_records as usize);

        // vlrs, plus any padding between the last vlr and the point data
        let mut vlrs = Vec::with_capacity(header.number_of_variable_length_records as usize);
        for _ in 0..header.number_of_variable_length_records {
            vlrs.push(Vlr::read_from(&mut read, false)?);
        }
        let vlr_end = read.stream_position()?;
        let offset_to_point_data = header.offset_to_point_data as u64;
        if offset_to_point_data < vlr_end {
            return Err(LasIoError::FileFormat {
                desc: format!(
                    "Point data offset {offset_to_point_data} lies within the VLRs (ending at {vlr_end})."
                ),
            });
        }
        let mut vlr_padding = vec![0; (offset_to_point_data - vlr_end) as usize];
        read.read_exact(&mut vlr_padding)?;

        // evlrs are carried over verbatim, read them up front so the
        // decompressor can take over the reader afterwards
        let evlr_data = match &header.evlr {
            Some(evlr) if evlr.number_of_evlrs > 0 => {
                if evlr.start_of_first_evlr < offset_to_point_data {
                    return Err(LasIoError::FileFormat {
                        desc: format!(
                            "First EVLR at offset {} lies before the point data.",
                            evlr.start_of_first_evlr
                        ),
                    });
                }
                read.seek(SeekFrom::Start(evlr.start_of_first_evlr))?;
                let mut data = Vec::new();
                read.read_to_end(&mut data)?;
                data
            }
            _ => Vec::new(),
        };

        // point records - either compressed, or raw
        read.seek(SeekFrom::Start(offset_to_point_data))?;
        let mut point_data = vec![0; stride * nr_points];
        let laz_vlr = if format.is_compressed {
            let vlr = vlrs.iter().find(|it| is_laszip_vlr(it)).ok_or_else(|| {
                LasIoError::FileFormat {
                    desc: "Missing LasZip VLR in compressed LAS (*.laz) file.".to_string(),
                }
            })?;
            let laszip_vlr = LazVlr::read_from(vlr.data.as_slice())?;
            let mut decompressor = LasZipDecompressor::new(&mut read, laszip_vlr.clone())?;
            decompressor.decompress_many(point_data.as_mut_slice())?;
            Some(laszip_vlr)
        } else {
            read.read_exact(point_data.as_mut_slice())?;
            None
        };

        debug!(
            "{}: {} points, point format {}, {}",
            path.display(),
            nr_points,
            format_id,
            if laz_vlr.is_some() {
                "compressed"
            } else {
                "uncompressed"
            }
        );
        Ok(PointCloudFile {
            header,
            vlrs,
            vlr_padding,
            point_data,
            evlr_data,
            laz_vlr,
            format_id,
            stride,
            nr_points,
        })
    }

    pub fn nr_points(&self) -> usize {
        self.nr_points
    }

    pub fn point_format(&self) -> u8 {
        self.format_id
    }

    pub fn is_compressed(&self) -> bool {
        self.laz_vlr.is_some()
    }

    /// The classification column, one entry per point.
    pub fn classification(&self) -> Vec<ClassId> {
        let offset = classification_offset(self.format_id);
        let extended = has_extended_classification(self.format_id);
        self.point_data
            .chunks_exact(self.stride)
            .map(|record| extract_class(record[offset], extended))
            .collect()
    }

    /// Writes a copy of the file to `path` with the classification column
    /// replaced. The output is compressed iff the source is.
    ///
    /// `classification` must have one entry per point.
    pub fn write_with_classification(
        &self,
        path: &Path,
        classification: &[ClassId],
    ) -> Result<(), LasIoError> {
        assert_eq!(classification.len(), self.nr_points);

        // patch the classification byte of every record
        let offset = classification_offset(self.format_id);
        let extended = has_extended_classification(self.format_id);
        let mut point_data = self.point_data.clone();
        for (record, &class_id) in point_data
            .chunks_exact_mut(self.stride)
            .zip(classification)
        {
            record[offset] = patch_class(record[offset], class_id, extended);
        }

        let mut write = BufWriter::new(File::create(path)?);
        let mut header = self.header.clone();
        header.write_to(&mut write)?;
        for vlr in &self.vlrs {
            vlr.write_to(&mut write)?;
        }
        write.write_all(&self.vlr_padding)?;

        if let Some(laz_vlr) = &self.laz_vlr {
            let mut compressor = LasZipCompressor::new(&mut write, laz_vlr.clone())?;
            compressor.compress_many(point_data.as_slice())?;
            compressor.done()?;
        } else {
            write.write_all(&point_data)?;
        }

        if !self.evlr_data.is_empty() {
            let start_of_first_evlr = write.stream_position()?;
            write.write_all(&self.evlr_data)?;

            // compressed point data usually changes size, so the evlr offset
            // in the header may have moved
            if let Some(evlr) = &mut header.evlr {
                if evlr.start_of_first_evlr != start_of_first_evlr {
                    evlr.start_of_first_evlr = start_of_first_evlr;
                    write.seek(SeekFrom::Start(0))?;
                    header.write_to(&mut write)?;
                }
            }
        }
        write.flush()?;
        Ok(())
    }
}

fn is_laszip_vlr(vlr: &Vlr) -> bool {
    read_las_string(&vlr.user_id)
        .map(|uid| uid == LazVlr::USER_ID)
        .unwrap_or(false)
        && vlr.record_id == LazVlr::RECORD_ID
}

fn read_las_string(las_str: &[u8]) -> Result<String, FromUtf8Error> {
    let bytes = las_str
        .iter()
        .take_while(|byte| **byte != 0)
        .cloned()
        .collect();
    String::from_utf8(bytes)
}

/// Byte offset of the classification within a point record.
fn classification_offset(format_id: u8) -> usize {
    if has_extended_classification(format_id) {
        16
    } else {
        15
    }
}

/// Point formats 6-10 use the full classification byte. In formats 0-5 the
/// upper three bits are the synthetic/key-point/withheld flags.
fn has_extended_classification(format_id: u8) -> bool {
    format_id >= 6
}

fn extract_class(byte: u8, extended: bool) -> ClassId {
    if extended {
        byte
    } else {
        byte & 0x1F
    }
}

/// Replaces the class id bits of a classification byte. For formats 0-5 the
/// flag bits of `old` are preserved.
fn patch_class(old: u8, class_id: ClassId, extended: bool) -> u8 {
    if extended {
        class_id
    } else {
        (old & 0xE0) | (class_id & 0x1F)
    }
}
