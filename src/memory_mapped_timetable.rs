use std::ops::Range;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, TimetableError};
use crate::export::{
    Header, Section, JOURNEY_PATTERN_RECORD_SIZE, TIME_SHIFT, VEHICLE_JOURNEY_RECORD_SIZE,
};
use crate::string_pool::{read_pooled, StringTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JourneyPatternRecord {
    pub route: u32,
    pub commercial_mode: u32,
    pub headsign: u32,
    pub route_types: u16,
    pub min_time: u16,
    pub max_time: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleJourneyRecord {
    pub time_demand_group: u32,
    pub departure_time: u16,
    pub attributes: u16,
}

impl VehicleJourneyRecord {
    /// Departure in seconds relative to the header's UTC offset.
    pub fn departure_seconds(&self) -> u32 {
        (self.departure_time as u32) << TIME_SHIFT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeDemandGroupPointRecord {
    pub drive_time: u16,
    pub total_drive_time: u16,
}

/// Slice of a flat section belonging to entity `i`, read from its offsets
/// section.
pub fn slice_of(offsets: &[u32], i: usize) -> Range<usize> {
    offsets[i] as usize..offsets[i + 1] as usize
}

/// Read access to a compiled timetable held in any byte buffer.
pub struct TimetableFile<D> {
    data: D,
    header: Header,
}

impl<D: AsRef<[u8]>> TimetableFile<D> {
    pub fn new(data: D) -> Result<TimetableFile<D>> {
        let header = Header::read(data.as_ref())?;
        let file = TimetableFile { data, header };
        for section in Section::ALL {
            file.section_bytes(section)?;
        }
        Ok(file)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn count(&self, section: Section) -> usize {
        self.header.count(section) as usize
    }

    /// Bytes of `section`, bounds-checked against the buffer.
    pub fn section_bytes(&self, section: Section) -> Result<&[u8]> {
        let data = self.data.as_ref();
        let start = self.header.location(section) as usize;
        let len = match section.element_size() {
            Some(size) => size * self.count(section),
            None => {
                let width = data
                    .get(start..start + 4)
                    .map(LittleEndian::read_u32)
                    .unwrap_or(0) as usize;
                4 + width * self.count(section)
            }
        };
        data.get(start..start + len).ok_or_else(|| {
            TimetableError::MalformedFile(format!(
                "section {:?} ({} bytes at {}) exceeds file size {}",
                section,
                len,
                start,
                data.len()
            ))
        })
    }

    pub fn u32s(&self, section: Section) -> Result<Vec<u32>> {
        let bytes = self.section_bytes(section)?;
        Ok(bytes.chunks_exact(4).map(LittleEndian::read_u32).collect())
    }

    pub fn u16s(&self, section: Section) -> Result<Vec<u16>> {
        let bytes = self.section_bytes(section)?;
        Ok(bytes.chunks_exact(2).map(LittleEndian::read_u16).collect())
    }

    pub fn u8s(&self, section: Section) -> Result<&[u8]> {
        self.section_bytes(section)
    }

    pub fn i8s(&self, section: Section) -> Result<Vec<i8>> {
        Ok(self
            .section_bytes(section)?
            .iter()
            .map(|b| *b as i8)
            .collect())
    }

    /// (latitude, longitude) pairs.
    pub fn coords(&self, section: Section) -> Result<Vec<(f32, f32)>> {
        let bytes = self.section_bytes(section)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|pair| {
                (
                    LittleEndian::read_f32(&pair[..4]),
                    LittleEndian::read_f32(&pair[4..]),
                )
            })
            .collect())
    }

    pub fn string_table(&self, section: Section) -> Result<StringTable<'_>> {
        StringTable::parse(self.section_bytes(section)?, self.count(section)).ok_or_else(|| {
            TimetableError::MalformedFile(format!("string table {:?} is truncated", section))
        })
    }

    pub fn pooled_string(&self, offset: u32) -> Option<&str> {
        read_pooled(self.section_bytes(Section::StringPool).ok()?, offset)
    }

    /// Strings of a section that stores string pool offsets.
    pub fn pooled_strings(&self, section: Section) -> Result<Vec<&str>> {
        self.u32s(section)?
            .into_iter()
            .map(|offset| {
                self.pooled_string(offset).ok_or_else(|| {
                    TimetableError::MalformedFile(format!(
                        "{:?} points outside the string pool at {}",
                        section, offset
                    ))
                })
            })
            .collect()
    }

    pub fn journey_patterns(&self) -> Result<Vec<JourneyPatternRecord>> {
        let bytes = self.section_bytes(Section::JourneyPatterns)?;
        Ok(bytes
            .chunks_exact(JOURNEY_PATTERN_RECORD_SIZE)
            .map(|r| JourneyPatternRecord {
                route: LittleEndian::read_u32(&r[0..4]),
                commercial_mode: LittleEndian::read_u32(&r[4..8]),
                headsign: LittleEndian::read_u32(&r[8..12]),
                route_types: LittleEndian::read_u16(&r[12..14]),
                min_time: LittleEndian::read_u16(&r[14..16]),
                max_time: LittleEndian::read_u16(&r[16..18]),
            })
            .collect())
    }

    pub fn vehicle_journeys(&self) -> Result<Vec<VehicleJourneyRecord>> {
        let bytes = self.section_bytes(Section::VehicleJourneys)?;
        Ok(bytes
            .chunks_exact(VEHICLE_JOURNEY_RECORD_SIZE)
            .map(|r| VehicleJourneyRecord {
                time_demand_group: LittleEndian::read_u32(&r[0..4]),
                departure_time: LittleEndian::read_u16(&r[4..6]),
                attributes: LittleEndian::read_u16(&r[6..8]),
            })
            .collect())
    }

    pub fn time_demand_group_points(&self) -> Result<Vec<TimeDemandGroupPointRecord>> {
        Ok(self
            .u16s(Section::TimeDemandGroupPoints)?
            .chunks_exact(2)
            .map(|pair| TimeDemandGroupPointRecord {
                drive_time: pair[0],
                total_drive_time: pair[1],
            })
            .collect())
    }
}

impl<D: AsRef<[u8]>> std::ops::Deref for TimetableFile<D> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_ref()
    }
}

pub type MemoryMappedTimetable = TimetableFile<memmap2::Mmap>;

// Safety: This is safe for as long as the underlying file is not modified.
pub unsafe fn load_memory_mapped_timetable(path: &Path) -> Result<MemoryMappedTimetable> {
    let file = std::fs::File::open(path)?;
    // Safety: This is safe for as long as the underlying file is not modified.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    TimetableFile::new(mmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_foreign_files() {
        let data = vec![0u8; Header::SIZE];
        assert!(matches!(
            TimetableFile::new(data),
            Err(TimetableError::MalformedFile(_))
        ));
        assert!(matches!(
            TimetableFile::new(b"TTABLEV4".to_vec()),
            Err(TimetableError::MalformedFile(_))
        ));
    }

    #[test]
    fn slice_of_uses_the_next_offset() {
        let offsets = [0, 3, 3, 5];
        assert_eq!(slice_of(&offsets, 0), 0..3);
        assert_eq!(slice_of(&offsets, 1), 3..3);
        assert_eq!(slice_of(&offsets, 2), 3..5);
    }

    #[test]
    fn departure_seconds_undo_the_shift() {
        let record = VehicleJourneyRecord {
            time_demand_group: 0,
            departure_time: 900,
            attributes: 0,
        };
        assert_eq!(record.departure_seconds(), 3600);
    }
}
