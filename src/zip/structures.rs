use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::io;

/// Any size, offset or count at or above this value needs the ZIP64 form.
pub const ZIP64_LIMIT: u64 = 0xFFFF_FFFF;

/// Entry counts at or above this value need the ZIP64 end records.
pub const ZIP64_ENTRY_LIMIT: u64 = 0xFFFF;

/// Bit 3: CRC-32 and sizes follow the body in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Bit 11: file names are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Unix host, APPNOTE 6.3.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 63;
pub const VERSION_NEEDED_DEFAULT: u16 = 20;
pub const VERSION_NEEDED_ZIP64: u16 = 45;

/// Regular file, rw-r--r--.
pub const EXTERNAL_ATTRS_FILE: u32 = 0o100644 << 16;

pub fn needs_zip64(value: u64) -> bool {
    value >= ZIP64_LIMIT
}

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
}

impl CompressionMethod {
    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// MS-DOS packed date and time, as stored in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const EPOCH: DosDateTime = DosDateTime {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// Encode a wall-clock time. Years outside 1980..=2107 clamp to the nearest bound.
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self::EPOCH;
        }
        if dt.year() > 2107 {
            return DosDateTime {
                time: (23 << 11) | (59 << 5) | 29,
                date: (127 << 9) | (12 << 5) | 31,
            };
        }

        let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        let date =
            (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        DosDateTime { time, date }
    }

    /// DOS timestamps carry no zone, so readers interpret them as local time.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::from_naive(dt.with_timezone(&Local).naive_local())
    }

    /// Parse modification date to (year, month, day)
    pub fn date_parts(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn time_parts(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let (year, month, day) = self.date_parts();
        let (hour, minute, second) = self.time_parts();
        NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?.and_hms_opt(
            hour as u32,
            minute as u32,
            second as u32,
        )
    }
}

/// Local File Header (LFH) - 30 bytes plus name
///
/// Always written in the deferred form: CRC-32 and both sizes are zero and
/// the real values follow the body in a [`DataDescriptor`].
pub struct LocalFileHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub modified: DosDateTime,
    pub file_name: &'a [u8],
}

impl LocalFileHeader<'_> {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn encoded_len(&self) -> u64 {
        (Self::SIZE + self.file_name.len()) as u64
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u16::<LittleEndian>(self.version_needed)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        buf.write_u16::<LittleEndian>(self.modified.time)?;
        buf.write_u16::<LittleEndian>(self.modified.date)?;
        buf.write_u32::<LittleEndian>(0)?; // crc32
        buf.write_u32::<LittleEndian>(0)?; // compressed size
        buf.write_u32::<LittleEndian>(0)?; // uncompressed size
        buf.write_u16::<LittleEndian>(self.file_name.len() as u16)?;
        buf.write_u16::<LittleEndian>(0)?; // extra field length
        buf.extend_from_slice(self.file_name);
        Ok(buf)
    }
}

/// Data descriptor - 16 bytes, or 24 bytes with 64-bit sizes
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub zip64: bool,
}

impl DataDescriptor {
    pub const SIGNATURE: &'static [u8] = b"PK\x07\x08";
    pub const SIZE: usize = 16;
    pub const ZIP64_SIZE: usize = 24;

    pub fn encoded_len(zip64: bool) -> u64 {
        if zip64 {
            Self::ZIP64_SIZE as u64
        } else {
            Self::SIZE as u64
        }
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::encoded_len(self.zip64) as usize);
        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u32::<LittleEndian>(self.crc32)?;
        if self.zip64 {
            buf.write_u64::<LittleEndian>(self.compressed_size)?;
            buf.write_u64::<LittleEndian>(self.uncompressed_size)?;
        } else {
            buf.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            buf.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        }
        Ok(buf)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes plus name and extra field
pub struct CentralDirectoryHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name: &'a [u8],
    pub lfh_offset: u64,
    pub zip64: bool,
}

impl CentralDirectoryHeader<'_> {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const MIN_SIZE: usize = 46;
    /// Header id, data size, then uncompressed size, compressed size and LFH offset.
    pub const ZIP64_EXTRA_SIZE: usize = 28;
    const ZIP64_EXTRA_ID: u16 = 0x0001;

    pub fn encoded_len(name_len: usize, zip64: bool) -> u64 {
        let extra = if zip64 { Self::ZIP64_EXTRA_SIZE } else { 0 };
        (Self::MIN_SIZE + name_len + extra) as u64
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::encoded_len(self.file_name.len(), self.zip64) as usize);
        let (compressed, uncompressed, offset) = if self.zip64 {
            (ZIP64_LIMIT as u32, ZIP64_LIMIT as u32, ZIP64_LIMIT as u32)
        } else {
            (
                self.compressed_size as u32,
                self.uncompressed_size as u32,
                self.lfh_offset as u32,
            )
        };

        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
        buf.write_u16::<LittleEndian>(self.version_needed)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        buf.write_u16::<LittleEndian>(self.modified.time)?;
        buf.write_u16::<LittleEndian>(self.modified.date)?;
        buf.write_u32::<LittleEndian>(self.crc32)?;
        buf.write_u32::<LittleEndian>(compressed)?;
        buf.write_u32::<LittleEndian>(uncompressed)?;
        buf.write_u16::<LittleEndian>(self.file_name.len() as u16)?;
        let extra_len = if self.zip64 { Self::ZIP64_EXTRA_SIZE } else { 0 };
        buf.write_u16::<LittleEndian>(extra_len as u16)?;
        buf.write_u16::<LittleEndian>(0)?; // file comment length
        buf.write_u16::<LittleEndian>(0)?; // disk number start
        buf.write_u16::<LittleEndian>(0)?; // internal attributes
        buf.write_u32::<LittleEndian>(EXTERNAL_ATTRS_FILE)?;
        buf.write_u32::<LittleEndian>(offset)?;
        buf.extend_from_slice(self.file_name);

        if self.zip64 {
            buf.write_u16::<LittleEndian>(Self::ZIP64_EXTRA_ID)?;
            buf.write_u16::<LittleEndian>((Self::ZIP64_EXTRA_SIZE - 4) as u16)?;
            buf.write_u64::<LittleEndian>(self.uncompressed_size)?;
            buf.write_u64::<LittleEndian>(self.compressed_size)?;
            buf.write_u64::<LittleEndian>(self.lfh_offset)?;
        }
        Ok(buf)
    }
}

/// ZIP64 End of Central Directory - 56 bytes
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const SIZE: usize = 56;

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(Self::SIGNATURE);
        // size of the record, not counting the leading 12 bytes
        buf.write_u64::<LittleEndian>((Self::SIZE - 12) as u64)?;
        buf.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
        buf.write_u16::<LittleEndian>(VERSION_NEEDED_ZIP64)?;
        buf.write_u32::<LittleEndian>(0)?; // disk number
        buf.write_u32::<LittleEndian>(0)?; // disk with central directory
        buf.write_u64::<LittleEndian>(self.total_entries)?;
        buf.write_u64::<LittleEndian>(self.total_entries)?;
        buf.write_u64::<LittleEndian>(self.cd_size)?;
        buf.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(buf)
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub eocd64_offset: u64,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u32::<LittleEndian>(0)?; // disk with ZIP64 EOCD
        buf.write_u64::<LittleEndian>(self.eocd64_offset)?;
        buf.write_u32::<LittleEndian>(1)?; // total disks
        Ok(buf)
    }
}

/// End of Central Directory (EOCD) - 22 bytes, no comment
pub struct EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn is_zip64(&self) -> bool {
        self.total_entries >= ZIP64_ENTRY_LIMIT
            || needs_zip64(self.cd_size)
            || needs_zip64(self.cd_offset)
    }

    /// Bytes of the end records, including the ZIP64 pair when required.
    pub fn encoded_len(&self) -> u64 {
        if self.is_zip64() {
            (Zip64EOCD::SIZE + Zip64EOCDLocator::SIZE + Self::SIZE) as u64
        } else {
            Self::SIZE as u64
        }
    }

    /// Serialise the end records. The ZIP64 record is placed at `cd_offset + cd_size`.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);

        if self.is_zip64() {
            let eocd64 = Zip64EOCD {
                total_entries: self.total_entries,
                cd_size: self.cd_size,
                cd_offset: self.cd_offset,
            };
            buf.extend_from_slice(&eocd64.to_bytes()?);
            let locator = Zip64EOCDLocator {
                eocd64_offset: self.cd_offset + self.cd_size,
            };
            buf.extend_from_slice(&locator.to_bytes()?);
        }

        let entries = self.total_entries.min(ZIP64_ENTRY_LIMIT) as u16;
        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u16::<LittleEndian>(0)?; // disk number
        buf.write_u16::<LittleEndian>(0)?; // disk with central directory
        buf.write_u16::<LittleEndian>(entries)?;
        buf.write_u16::<LittleEndian>(entries)?;
        buf.write_u32::<LittleEndian>(self.cd_size.min(ZIP64_LIMIT) as u32)?;
        buf.write_u32::<LittleEndian>(self.cd_offset.min(ZIP64_LIMIT) as u32)?;
        buf.write_u16::<LittleEndian>(0)?; // comment length
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dos_time_packs_fields() {
        let dt = NaiveDate::from_ymd_opt(2021, 6, 15)
            .unwrap()
            .and_hms_opt(13, 45, 31)
            .unwrap();
        let dos = DosDateTime::from_naive(dt);
        assert_eq!(dos.date_parts(), (2021, 6, 15));
        // two-second resolution
        assert_eq!(dos.time_parts(), (13, 45, 30));
        assert_eq!(dos.to_naive(), dt.with_second(30));
    }

    #[test]
    fn dos_time_clamps_out_of_range_years() {
        let early = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(DosDateTime::from_naive(early), DosDateTime::EPOCH);
        assert_eq!(DosDateTime::EPOCH.date_parts(), (1980, 1, 1));

        let late = NaiveDate::from_ymd_opt(2200, 3, 3)
            .unwrap()
            .and_hms_opt(1, 2, 3)
            .unwrap();
        let dos = DosDateTime::from_naive(late);
        assert_eq!(dos.date_parts(), (2107, 12, 31));
        assert_eq!(dos.time_parts(), (23, 59, 58));
    }

    #[test]
    fn local_header_layout() {
        let header = LocalFileHeader {
            version_needed: VERSION_NEEDED_DEFAULT,
            flags: FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
            compression_method: CompressionMethod::Deflate,
            modified: DosDateTime::EPOCH,
            file_name: b"dir/a.txt",
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len() as u64, header.encoded_len());
        assert_eq!(&bytes[0..4], LocalFileHeader::SIGNATURE);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 0x0808);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 8);
        assert_eq!(&bytes[14..26], &[0u8; 12]);
        assert_eq!(u16::from_le_bytes([bytes[26], bytes[27]]), 9);
        assert_eq!(&bytes[30..], b"dir/a.txt");
    }

    #[test]
    fn central_header_zip64_extra() {
        let header = CentralDirectoryHeader {
            version_needed: VERSION_NEEDED_ZIP64,
            flags: FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
            compression_method: CompressionMethod::Stored,
            modified: DosDateTime::EPOCH,
            crc32: 0xDEADBEEF,
            compressed_size: 5 << 30,
            uncompressed_size: 5 << 30,
            file_name: b"big",
            lfh_offset: 7,
            zip64: true,
        };
        let bytes = header.to_bytes().unwrap();
        assert_eq!(
            bytes.len() as u64,
            CentralDirectoryHeader::encoded_len(3, true)
        );
        assert_eq!(&bytes[20..24], &[0xFF; 4]);
        assert_eq!(&bytes[42..46], &[0xFF; 4]);
        let extra = &bytes[49..];
        assert_eq!(&extra[0..4], &[1, 0, 24, 0]);
        assert_eq!(u64::from_le_bytes(extra[4..12].try_into().unwrap()), 5 << 30);
        assert_eq!(u64::from_le_bytes(extra[20..28].try_into().unwrap()), 7);
    }

    #[test]
    fn end_records_switch_to_zip64() {
        let small = EndOfCentralDirectory {
            total_entries: 3,
            cd_size: 150,
            cd_offset: 1000,
        };
        assert!(!small.is_zip64());
        assert_eq!(small.to_bytes().unwrap().len() as u64, small.encoded_len());
        assert_eq!(small.encoded_len(), 22);

        let many = EndOfCentralDirectory {
            total_entries: 70_000,
            cd_size: 150,
            cd_offset: 1000,
        };
        assert!(many.is_zip64());
        let bytes = many.to_bytes().unwrap();
        assert_eq!(bytes.len(), 98);
        assert_eq!(&bytes[0..4], Zip64EOCD::SIGNATURE);
        assert_eq!(&bytes[56..60], Zip64EOCDLocator::SIGNATURE);
        assert_eq!(&bytes[76..80], EndOfCentralDirectory::SIGNATURE);
        // classic entry counts saturate
        assert_eq!(&bytes[84..88], &[0xFF; 4]);
    }
}
