//! FITS access through cfitsio: primary images and cubes, plus the `FRAMES`
//! binary table holding per-frame columns of persisted cubes.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fitsio::errors::Error as FitsioError;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::tables::{ColumnDataType, ColumnDescription, ConcreteColumnDescription};
use fitsio::FitsFile;
use ndarray::{Array2, Array3};
use tracing::debug;

use crate::config::Precision;
use crate::error::{CastorError, Result};

pub const TIMESTAMP_COLUMN: &str = "DATE-OBS";
pub const FRAME_TABLE: &str = "FRAMES";

/// cfitsio status returned when no HDU matches a name.
const BAD_HDU_NUM: i32 = 301;

/// cfitsio keeps process-wide state. Every open file holds this lock, so a
/// thread must never open two files at once.
static CFITSIO: Mutex<()> = Mutex::new(());

fn lock_cfitsio() -> MutexGuard<'static, ()> {
    CFITSIO.lock().unwrap_or_else(|e| e.into_inner())
}

fn image_type(precision: Precision) -> ImageType {
    match precision {
        Precision::Single => ImageType::Float,
        Precision::Double => ImageType::Double,
    }
}

/// Value of a header keyword.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Ordered keywords written after the primary image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<(String, HeaderValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a keyword, replacing any previous value.
    pub fn set(&mut self, keyword: &str, value: HeaderValue) {
        let keyword = keyword.to_ascii_uppercase();
        match self.cards.iter_mut().find(|(k, _)| *k == keyword) {
            Some(card) => card.1 = value,
            None => self.cards.push((keyword, value)),
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(keyword))
            .map(|(_, v)| v)
    }

    pub fn cards(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn write(&self, hdu: &FitsHdu, file: &mut FitsFile) -> Result<()> {
        for (keyword, value) in self.cards() {
            match value {
                HeaderValue::Integer(v) => hdu.write_key(file, keyword, *v)?,
                HeaderValue::Float(v) => hdu.write_key(file, keyword, *v)?,
                HeaderValue::Text(v) => hdu.write_key(file, keyword, v.clone())?,
            }
        }
        Ok(())
    }
}

/// One column of the `FRAMES` table, one row per frame of the cube.
#[derive(Clone, Debug, PartialEq)]
pub enum TableColumn {
    /// Fixed-width strings.
    Text {
        name: String,
        width: usize,
        values: Vec<String>,
    },
    /// Double-precision numbers.
    Float { name: String, values: Vec<f64> },
}

impl TableColumn {
    pub fn text(name: &str, width: usize, values: Vec<String>) -> Self {
        Self::Text {
            name: name.to_string(),
            width,
            values,
        }
    }

    pub fn float(name: &str, values: Vec<f64>) -> Self {
        Self::Float {
            name: name.to_string(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::Float { name, .. } => name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text { values, .. } => values.len(),
            Self::Float { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn description(&self) -> Result<ConcreteColumnDescription> {
        let description = match self {
            Self::Text { name, width, .. } => ColumnDescription::new(name)
                .with_type(ColumnDataType::String)
                .that_repeats(*width)
                .create()?,
            Self::Float { name, .. } => ColumnDescription::new(name)
                .with_type(ColumnDataType::Double)
                .create()?,
        };
        Ok(description)
    }

    fn write(&self, hdu: &FitsHdu, file: &mut FitsFile) -> Result<()> {
        match self {
            Self::Text { name, values, .. } => hdu.write_col(file, name.as_str(), values)?,
            Self::Float { name, values } => hdu.write_col(file, name.as_str(), values)?,
        };
        Ok(())
    }
}

/// Write a 2-D primary image followed by `header`, replacing `path`.
pub fn write_image(
    path: &Path,
    data: &Array2<f32>,
    header: &FitsHeader,
    precision: Precision,
) -> Result<()> {
    let (height, width) = data.dim();
    let description = ImageDescription {
        data_type: image_type(precision),
        dimensions: &[height, width],
    };

    let _guard = lock_cfitsio();
    let mut file = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    let hdu = file.primary_hdu()?;
    let pixels: Vec<f32> = data.iter().copied().collect();
    hdu.write_image(&mut file, &pixels)?;
    header.write(&hdu, &mut file)?;
    Ok(())
}

/// Write a cube as a 3-D primary image and `columns` as the `FRAMES` table,
/// replacing `path`.
///
/// Every column must hold one row per frame. A column of another length
/// fails the write after the image has been written.
pub fn write_cube(
    path: &Path,
    data: &Array3<f32>,
    columns: &[TableColumn],
    precision: Precision,
) -> Result<()> {
    let (frames, height, width) = data.dim();
    let description = ImageDescription {
        data_type: image_type(precision),
        dimensions: &[frames, height, width],
    };

    let _guard = lock_cfitsio();
    let mut file = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    let primary = file.primary_hdu()?;
    let pixels: Vec<f32> = data.iter().copied().collect();
    primary.write_image(&mut file, &pixels)?;

    if columns.is_empty() {
        return Ok(());
    }
    let descriptions = columns
        .iter()
        .map(TableColumn::description)
        .collect::<Result<Vec<_>>>()?;
    let table = file.create_table(FRAME_TABLE.to_string(), &descriptions)?;
    for column in columns {
        if column.len() != frames {
            return Err(CastorError::InvalidFits(format!(
                "column {} has {} rows for {frames} frames",
                column.name(),
                column.len()
            )));
        }
        column.write(&table, &mut file)?;
    }
    debug!(path = %path.display(), frames, columns = columns.len(), "Cube written");
    Ok(())
}

/// Read access to one FITS file.
pub struct FitsReader {
    file: FitsFile,
    path: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

impl FitsReader {
    pub fn open(path: &Path) -> Result<Self> {
        let guard = lock_cfitsio();
        let file = FitsFile::open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shape of the primary image, slowest axis first.
    pub fn image_shape(&mut self) -> Result<Vec<usize>> {
        let hdu = self.file.primary_hdu()?;
        match hdu.info {
            HduInfo::ImageInfo { shape, .. } => Ok(shape),
            _ => Err(CastorError::InvalidFits(format!(
                "{}: primary HDU is not an image",
                self.path.display()
            ))),
        }
    }

    fn read_pixels(&mut self, axes: usize) -> Result<(Vec<usize>, Vec<f32>)> {
        let shape = self.image_shape()?;
        if shape.len() != axes {
            return Err(CastorError::InvalidFits(format!(
                "{}: expected {axes} axes, found {}",
                self.path.display(),
                shape.len()
            )));
        }
        let hdu = self.file.primary_hdu()?;
        let pixels: Vec<f32> = hdu.read_image(&mut self.file)?;
        Ok((shape, pixels))
    }

    /// Read the primary image as `(height, width)` samples.
    pub fn read_image(&mut self) -> Result<Array2<f32>> {
        let (shape, pixels) = self.read_pixels(2)?;
        Array2::from_shape_vec((shape[0], shape[1]), pixels)
            .map_err(|e| CastorError::InvalidFits(e.to_string()))
    }

    /// Read the primary image as `(frames, height, width)` samples.
    pub fn read_cube(&mut self) -> Result<Array3<f32>> {
        let (shape, pixels) = self.read_pixels(3)?;
        Array3::from_shape_vec((shape[0], shape[1], shape[2]), pixels)
            .map_err(|e| CastorError::InvalidFits(e.to_string()))
    }

    /// Numeric keyword of the primary header. A missing keyword is `None`.
    pub fn read_key_f64(&mut self, keyword: &str) -> Result<Option<f64>> {
        let hdu = self.file.primary_hdu()?;
        Ok(hdu.read_key::<f64>(&mut self.file, keyword).ok())
    }

    pub fn read_key_i64(&mut self, keyword: &str) -> Result<Option<i64>> {
        let hdu = self.file.primary_hdu()?;
        Ok(hdu.read_key::<i64>(&mut self.file, keyword).ok())
    }

    pub fn read_key_str(&mut self, keyword: &str) -> Result<Option<String>> {
        let hdu = self.file.primary_hdu()?;
        Ok(hdu.read_key::<String>(&mut self.file, keyword).ok())
    }

    /// The `FRAMES` table and its column names, if the file has one.
    fn frame_table(&mut self) -> Result<Option<(FitsHdu, Vec<String>)>> {
        let hdu = match self.file.hdu(FRAME_TABLE) {
            Ok(hdu) => hdu,
            Err(FitsioError::Fits(e)) if e.status == BAD_HDU_NUM => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let names = match &hdu.info {
            HduInfo::TableInfo {
                column_descriptions,
                ..
            } => column_descriptions.iter().map(|c| c.name.clone()).collect(),
            _ => {
                return Err(CastorError::InvalidFits(format!(
                    "{}: {FRAME_TABLE} is not a table",
                    self.path.display()
                )))
            }
        };
        Ok(Some((hdu, names)))
    }

    fn table_with(&mut self, column: &str) -> Result<Option<FitsHdu>> {
        Ok(self
            .frame_table()?
            .filter(|(_, names)| names.iter().any(|n| n.eq_ignore_ascii_case(column)))
            .map(|(hdu, _)| hdu))
    }

    /// Text column of the `FRAMES` table, `None` if absent.
    pub fn read_text_column(&mut self, column: &str) -> Result<Option<Vec<String>>> {
        let Some(hdu) = self.table_with(column)? else {
            return Ok(None);
        };
        let values: Vec<String> = hdu.read_col(&mut self.file, column)?;
        Ok(Some(
            values.into_iter().map(|v| v.trim_end().to_string()).collect(),
        ))
    }

    /// Numeric column of the `FRAMES` table, `None` if absent.
    pub fn read_float_column(&mut self, column: &str) -> Result<Option<Vec<f64>>> {
        let Some(hdu) = self.table_with(column)? else {
            return Ok(None);
        };
        Ok(Some(hdu.read_col(&mut self.file, column)?))
    }

    pub fn read_timestamp_column(&mut self) -> Result<Option<Vec<String>>> {
        self.read_text_column(TIMESTAMP_COLUMN)
    }
}
