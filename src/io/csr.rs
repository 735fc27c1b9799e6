//! Compact binary CSR format for spatial weight matrices.
//!
//! Layout (little endian): magic `SWMB`, flag byte (bit 0 row-standardized,
//! bit 1 zero policy), unit count and nnz as u64, ids as u32 length + UTF-8
//! bytes, raw row sums as f64, indptr as u64, indices as u32, weights as f64.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, ensure};

use crate::weights::{SpatialWeightMatrix, WeightStyle};

const MAGIC: &[u8; 4] = b"SWMB";
const ROW_STANDARDIZED: u8 = 1;
const ZERO_POLICY: u8 = 2;

/// Write a weight matrix to binary CSR bytes.
pub fn write_weights_bytes(w: &SpatialWeightMatrix) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_weights_csr(&mut out, w)?;
    Ok(out)
}

/// Read a weight matrix from binary CSR bytes.
pub fn read_weights_bytes(bytes: &[u8]) -> Result<SpatialWeightMatrix> {
    read_weights_csr(&mut Cursor::new(bytes))
}

pub fn write_weights_file(w: &SpatialWeightMatrix, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("[io::csr] Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_weights_csr(&mut writer, w)?;
    writer.flush().with_context(|| format!("[io::csr] Failed to flush {}", path.display()))
}

pub fn read_weights_file(path: &Path) -> Result<SpatialWeightMatrix> {
    let file = File::open(path)
        .with_context(|| format!("[io::csr] Failed to open {}", path.display()))?;
    read_weights_csr(&mut BufReader::new(file))
}

fn write_weights_csr<W: Write>(writer: &mut W, w: &SpatialWeightMatrix) -> Result<()> {
    let mut flags = 0u8;
    if w.style() == WeightStyle::RowStandardized { flags |= ROW_STANDARDIZED }
    if w.zero_policy() { flags |= ZERO_POLICY }

    // Header
    writer.write_all(MAGIC)
        .context("[io::csr] Failed to write magic bytes")?;
    writer.write_all(&[flags])
        .context("[io::csr] Failed to write flags")?;
    writer.write_all(&(w.n() as u64).to_le_bytes())
        .context("[io::csr] Failed to write row count")?;
    writer.write_all(&(w.nnz() as u64).to_le_bytes())
        .context("[io::csr] Failed to write nnz")?;

    for id in w.ids() {
        writer.write_all(&(id.len() as u32).to_le_bytes())
            .and_then(|_| writer.write_all(id.as_bytes()))
            .with_context(|| format!("[io::csr] Failed to write id '{id}'"))?;
    }
    for &sum in w.raw_row_sums() {
        writer.write_all(&sum.to_le_bytes())
            .context("[io::csr] Failed to write raw row sums")?;
    }

    // indptr
    let mut offset = 0u64;
    writer.write_all(&offset.to_le_bytes())
        .context("[io::csr] Failed to write indptr")?;
    for i in 0..w.n() {
        offset += w.row(i).0.len() as u64;
        writer.write_all(&offset.to_le_bytes())
            .context("[io::csr] Failed to write indptr")?;
    }

    // indices, then weights
    for i in 0..w.n() {
        for &j in w.row(i).0 {
            writer.write_all(&j.to_le_bytes())
                .context("[io::csr] Failed to write indices")?;
        }
    }
    for i in 0..w.n() {
        for &val in w.row(i).1 {
            writer.write_all(&val.to_le_bytes())
                .context("[io::csr] Failed to write weights")?;
        }
    }
    Ok(())
}

fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    let mut b8 = [0u8; 8];
    reader.read_exact(&mut b8)
        .with_context(|| format!("[io::csr] Failed to read {what}"))?;
    Ok(u64::from_le_bytes(b8))
}

fn read_weights_csr<R: Read>(reader: &mut R) -> Result<SpatialWeightMatrix> {
    // Header
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)
        .context("[io::csr] Failed to read magic bytes")?;
    ensure!(&magic == MAGIC, "[io::csr] Invalid magic: expected 'SWMB'");

    let mut flags = [0u8; 1];
    reader.read_exact(&mut flags)
        .context("[io::csr] Failed to read flags")?;
    let style = if flags[0] & ROW_STANDARDIZED != 0 { WeightStyle::RowStandardized } else { WeightStyle::Binary };
    let zero_policy = flags[0] & ZERO_POLICY != 0;

    let n = read_u64(reader, "row count")? as usize;
    let nnz = read_u64(reader, "nnz")? as usize;

    let mut ids = Vec::with_capacity(n);
    for _ in 0..n {
        let mut b4 = [0u8; 4];
        reader.read_exact(&mut b4)
            .context("[io::csr] Failed to read id length")?;
        let mut bytes = vec![0u8; u32::from_le_bytes(b4) as usize];
        reader.read_exact(&mut bytes)
            .context("[io::csr] Failed to read id")?;
        ids.push(String::from_utf8(bytes).context("[io::csr] Id is not valid UTF-8")?);
    }

    let mut raw_row_sums = vec![0f64; n];
    for x in &mut raw_row_sums {
        *x = f64::from_bits(read_u64(reader, "raw row sums")?);
    }

    let mut indptr = vec![0u64; n + 1];
    for o in &mut indptr {
        *o = read_u64(reader, "indptr")?;
    }
    ensure!(indptr[n] as usize == nnz, "[io::csr] nnz mismatch: header {} vs indptr {}", nnz, indptr[n]);
    ensure!(indptr.windows(2).all(|w| w[0] <= w[1]), "[io::csr] indptr is not monotone");

    let mut indices = vec![0u32; nnz];
    for x in &mut indices {
        let mut b4 = [0u8; 4];
        reader.read_exact(&mut b4)
            .context("[io::csr] Failed to read indices")?;
        *x = u32::from_le_bytes(b4);
    }
    ensure!(indices.iter().all(|&j| (j as usize) < n), "[io::csr] column index out of range");

    let mut data = vec![0f64; nnz];
    for x in &mut data {
        *x = f64::from_bits(read_u64(reader, "weights")?);
    }

    let triples = (0..n)
        .flat_map(|i| (indptr[i] as usize..indptr[i + 1] as usize).map(move |k| (i, k)))
        .map(|(i, k)| (ids[i].clone(), ids[indices[k] as usize].clone(), data[k]))
        .collect::<Vec<_>>();
    SpatialWeightMatrix::from_triples(ids, style, zero_policy, triples, Some(raw_row_sums))
        .context("[io::csr] Invalid weight matrix")
}
