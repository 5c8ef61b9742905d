//! Flat transaction buffer
//!
//! Values are written back to back in native-endian 32-bit cells; strings are
//! length-prefixed UTF-8 padded to 4 bytes. Readers must consume values in the
//! order they were written.

use dexopt_error::{DexOptError, DexOptResult, ServiceError};

const NULL_LENGTH: i32 = -1;
const FD_TAG: i32 = 0x66_64_00_00;
const BINDER_NULL: i32 = 0;
const BINDER_PRESENT: i32 = 1;

/// Exception code written by a service that rejected a command
pub const EX_SERVICE_SPECIFIC: i32 = -8;
/// Exception code for a malformed or unexpected request
pub const EX_ILLEGAL_ARGUMENT: i32 = -3;

/// Transaction payload/reply buffer
#[derive(Debug, Default, Clone)]
pub struct Parcel {
    data: Vec<u8>,
    position: usize,
}

impl Parcel {
    pub fn obtain() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rewind for reading from the start
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_ne_bytes());
    }

    pub fn write_string(&mut self, value: Option<&str>) {
        match value {
            None => self.write_i32(NULL_LENGTH),
            Some(s) => {
                self.write_i32(s.len() as i32);
                self.data.extend_from_slice(s.as_bytes());
                let padding = (4 - s.len() % 4) % 4;
                self.data.extend(std::iter::repeat_n(0u8, padding));
            }
        }
    }

    pub fn write_string_array<S: AsRef<str>>(&mut self, values: &[S]) {
        self.write_i32(values.len() as i32);
        for value in values {
            self.write_string(Some(value.as_ref()));
        }
    }

    pub fn write_file_descriptor(&mut self, fd: i32) {
        self.write_i32(FD_TAG);
        self.write_i32(fd);
    }

    /// Binder slot; only the null object is ever sent from here
    pub fn write_strong_binder(&mut self, binder: Option<u32>) {
        match binder {
            None => self.write_i32(BINDER_NULL),
            Some(handle) => {
                self.write_i32(BINDER_PRESENT);
                self.write_i32(handle as i32);
            }
        }
    }

    pub fn write_no_exception(&mut self) {
        self.write_i32(0);
    }

    pub fn write_exception(&mut self, code: i32, message: &str) {
        self.write_i32(code);
        self.write_string(Some(message));
    }

    pub fn read_i32(&mut self) -> DexOptResult<i32> {
        let end = self.position + 4;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or_else(|| malformed(format!("read past end at offset {}", self.position)))?;
        let mut cell = [0u8; 4];
        cell.copy_from_slice(bytes);
        self.position = end;
        Ok(i32::from_ne_bytes(cell))
    }

    pub fn read_string(&mut self) -> DexOptResult<Option<String>> {
        let len = self.read_i32()?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        if len < 0 {
            return Err(malformed(format!("negative string length {len}")));
        }
        let len = len as usize;
        let end = self.position + len;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or_else(|| malformed("string runs past end".to_string()))?;
        let value = String::from_utf8(bytes.to_vec()).map_err(|e| malformed(e.to_string()))?;
        self.position = end + (4 - len % 4) % 4;
        Ok(Some(value))
    }

    pub fn read_string_array(&mut self) -> DexOptResult<Vec<String>> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(malformed(format!("negative array length {count}")));
        }
        (0..count)
            .map(|_| {
                self.read_string()?
                    .ok_or_else(|| malformed("null entry in string array".to_string()))
            })
            .collect()
    }

    pub fn read_file_descriptor(&mut self) -> DexOptResult<i32> {
        let tag = self.read_i32()?;
        if tag != FD_TAG {
            return Err(malformed(format!("expected file descriptor, found tag {tag:#x}")));
        }
        self.read_i32()
    }

    pub fn read_strong_binder(&mut self) -> DexOptResult<Option<u32>> {
        match self.read_i32()? {
            BINDER_NULL => Ok(None),
            BINDER_PRESENT => Ok(Some(self.read_i32()? as u32)),
            other => Err(malformed(format!("bad binder marker {other}"))),
        }
    }

    /// Reply header check: a non-zero code carries a remote exception
    pub fn read_exception(&mut self) -> DexOptResult<()> {
        let code = self.read_i32()?;
        if code == 0 {
            return Ok(());
        }
        let message = self.read_string()?.unwrap_or_default();
        Err(DexOptError::service(ServiceError::RemoteException(code, message)))
    }
}

fn malformed(message: String) -> DexOptError {
    DexOptError::service(ServiceError::MalformedParcel(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_padding_keeps_alignment() {
        let mut parcel = Parcel::obtain();
        parcel.write_string(Some("abcde"));
        parcel.write_i32(7);
        assert_eq!(parcel.len() % 4, 0);
        parcel.rewind();
        assert_eq!(parcel.read_string().unwrap().as_deref(), Some("abcde"));
        assert_eq!(parcel.read_i32().unwrap(), 7);
    }

    #[test]
    fn test_null_string() {
        let mut parcel = Parcel::obtain();
        parcel.write_string(None);
        parcel.rewind();
        assert_eq!(parcel.read_string().unwrap(), None);
    }

    #[test]
    fn test_exception_reply() {
        let mut reply = Parcel::obtain();
        reply.write_exception(EX_SERVICE_SPECIFIC, "Failure: package not found");
        reply.rewind();
        let err = reply.read_exception().unwrap_err();
        assert!(matches!(
            err,
            DexOptError::Service {
                source: ServiceError::RemoteException(EX_SERVICE_SPECIFIC, _),
                ..
            }
        ));
    }

    #[test]
    fn test_empty_reply_is_malformed() {
        let mut reply = Parcel::obtain();
        assert!(reply.read_exception().is_err());
    }

    #[test]
    fn test_fd_tag_mismatch() {
        let mut parcel = Parcel::obtain();
        parcel.write_i32(1);
        parcel.write_i32(2);
        parcel.rewind();
        assert!(parcel.read_file_descriptor().is_err());
    }
}
