//! Fragment planning - contiguous byte ranges of a file

use super::FileError;

use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, Take};

/// A contiguous slice of a file, the unit of upload and download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Position in the plan (0-based, increasing with offset)
    pub index: usize,

    /// Byte offset into the file
    pub offset: u64,

    /// Fragment length, never above the plan's fragment size
    pub length: u64,
}

impl Fragment {
    /// Offset one past the last byte
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// How a file of a given size splits into fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentPlan {
    file_size: u64,
    fragment_size: u64,
}

impl FragmentPlan {
    /// Create a plan; `fragment_size` must be positive
    pub fn new(file_size: u64, fragment_size: u64) -> Result<Self, FileError> {
        if fragment_size == 0 {
            return Err(FileError::InvalidFragmentSize);
        }

        Ok(Self {
            file_size,
            fragment_size,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// Number of fragments: ceil(file_size / fragment_size)
    pub fn len(&self) -> usize {
        self.file_size.div_ceil(self.fragment_size) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.file_size == 0
    }

    /// Get fragment by index
    pub fn get(&self, index: usize) -> Result<Fragment, FileError> {
        let total = self.len();
        if index >= total {
            return Err(FileError::FragmentOutOfRange { index, total });
        }

        let offset = index as u64 * self.fragment_size;
        let length = self.fragment_size.min(self.file_size - offset);
        Ok(Fragment {
            index,
            offset,
            length,
        })
    }

    /// Iterate fragments in increasing offset order
    pub fn fragments(&self) -> impl Iterator<Item = Fragment> + '_ {
        (0..self.len()).map(move |index| {
            let offset = index as u64 * self.fragment_size;
            Fragment {
                index,
                offset,
                length: self.fragment_size.min(self.file_size - offset),
            }
        })
    }
}

/// Position `reader` at a fragment and cap it at the fragment's length.
///
/// Reading the returned handle to the end yields exactly the fragment bytes,
/// or fewer if the file is shorter than the plan says; callers check the count.
pub async fn fragment_reader<'r, R>(reader: &'r mut R, fragment: &Fragment) -> std::io::Result<Take<&'r mut R>>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    reader.seek(SeekFrom::Start(fragment.offset)).await?;
    Ok(AsyncReadExt::take(reader, fragment.length))
}
