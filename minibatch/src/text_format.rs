//! Reader for the CNTK text format.
//!
//! Every non-blank line holds one sample:
//!
//! ```text
//! [sequence id] |features 0.5 1.5 |labels 0:1 |# comment
//! ```
//!
//! Dense fields list exactly `dim` values, sparse fields list `index:value`
//! pairs. Consecutive lines sharing a sequence id form one sequence; a line
//! without an id is a sequence of its own.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::debug;
use ndarray::{Array2, Axis};

use crate::{MinibatchError, Result};

const FIELD_SEPARATOR: char = '|';
const COMMENT_PREFIX: char = '#';
const SPARSE_SEPARATOR: char = ':';

/// A stream as the deserializer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputStream {
    pub name: String,
    /// Field name inside the file.
    pub alias: String,
    pub dim: usize,
    pub is_sparse: bool,
}

/// Every sample of a file, one matrix per stream.
#[derive(Debug, Clone)]
pub struct Corpus {
    /// Ordinal of the sequence each sample belongs to.
    sequences: Vec<usize>,
    columns: Vec<Array2<f32>>,
}

impl Corpus {
    #[inline]
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    #[inline]
    pub fn num_streams(&self) -> usize {
        self.columns.len()
    }

    /// Returns the `[samples, dim]` matrix of stream `idx`.
    #[inline]
    pub fn stream(&self, idx: usize) -> &Array2<f32> {
        &self.columns[idx]
    }

    /// Copies the rows of stream `idx` listed in `rows`, in that order.
    pub fn gather(&self, idx: usize, rows: &[usize]) -> Array2<f32> {
        self.columns[idx].select(Axis(0), rows)
    }

    /// Counts the sequences spanned by `rows`, taken in that order.
    pub fn count_sequences(&self, rows: &[usize]) -> usize {
        let mut count = 0;
        let mut last = None;
        for &row in rows {
            let seq = self.sequences[row];
            if last != Some(seq) {
                count += 1;
            }
            last = Some(seq);
        }
        count
    }

    /// Appends the streams of `other`, which must hold as many samples.
    pub fn merge(&mut self, other: Corpus) -> Result<()> {
        if other.len() != self.len() {
            return Err(MinibatchError::InvalidConfig(format!(
                "deserializers disagree on sample count: {} vs {}",
                self.len(),
                other.len()
            )));
        }
        self.columns.extend(other.columns);
        Ok(())
    }
}

/// Parses text-format files into a [`Corpus`].
#[derive(Debug, Clone)]
pub struct TextFormatDeserializer {
    streams: Vec<InputStream>,
    by_alias: HashMap<String, usize>,
}

impl TextFormatDeserializer {
    pub fn new(streams: Vec<InputStream>) -> Self {
        let by_alias = streams
            .iter()
            .enumerate()
            .map(|(i, s)| (s.alias.clone(), i))
            .collect();
        Self { streams, by_alias }
    }

    pub fn streams(&self) -> &[InputStream] {
        &self.streams
    }

    /// Reads the whole file at `path`.
    ///
    /// # Errors
    /// I/O failures, malformed lines (with their 1-based line number) and
    /// files without samples.
    pub fn load(&self, path: &Path) -> Result<Corpus> {
        let io_err = |source| MinibatchError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let corpus = self.read(BufReader::new(file)).map_err(|e| match e {
            MinibatchError::EmptyDataset(_) => MinibatchError::EmptyDataset(path.to_path_buf()),
            MinibatchError::Io { source, .. } => io_err(source),
            other => other,
        })?;

        debug!(
            samples = corpus.len(), streams = corpus.num_streams();
            "loaded {}", path.display()
        );
        Ok(corpus)
    }

    /// Reads samples from any buffered reader.
    pub fn read<R: BufRead>(&self, reader: R) -> Result<Corpus> {
        let mut rows: Vec<Vec<f32>> = vec![Vec::new(); self.streams.len()];
        let mut sequences = Vec::new();
        let mut last_id = None;

        for (i, line) in reader.lines().enumerate() {
            let line_num = i + 1;
            let line = line.map_err(|source| MinibatchError::Io {
                path: Default::default(),
                source,
            })?;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let id = self.parse_line(line, line_num, &mut rows)?;

            let continues = id.is_some() && id == last_id;
            let seq = match sequences.last() {
                Some(&prev) if continues => prev,
                Some(&prev) => prev + 1,
                None => 0,
            };
            sequences.push(seq);
            last_id = id;
        }

        if sequences.is_empty() {
            return Err(MinibatchError::EmptyDataset(Default::default()));
        }

        let columns = rows
            .into_iter()
            .zip(&self.streams)
            .map(|(data, stream)| {
                Array2::from_shape_vec((sequences.len(), stream.dim), data)
                    .map_err(|e| MinibatchError::InvalidConfig(e.to_string()))
            })
            .collect::<Result<_>>()?;

        Ok(Corpus { sequences, columns })
    }

    /// Parses one sample, appending a row to every stream.
    ///
    /// # Returns
    /// The sequence id of the line, if it has one.
    fn parse_line(
        &self,
        line: &str,
        line_num: usize,
        rows: &mut [Vec<f32>],
    ) -> Result<Option<u64>> {
        let Some((prefix, fields)) = line.split_once(FIELD_SEPARATOR) else {
            return Err(MinibatchError::parse(line_num, "no stream fields"));
        };

        let prefix = prefix.trim();
        let id = if prefix.is_empty() {
            None
        } else {
            let id = prefix.parse().map_err(|_| {
                MinibatchError::parse(line_num, format!("invalid sequence id '{prefix}'"))
            })?;
            Some(id)
        };

        let mut seen = vec![false; self.streams.len()];
        for field in fields.split(FIELD_SEPARATOR) {
            let mut tokens = field.split_whitespace();
            let Some(alias) = tokens.next() else {
                return Err(MinibatchError::parse(line_num, "empty field"));
            };

            if alias.starts_with(COMMENT_PREFIX) {
                continue;
            }

            let Some(&idx) = self.by_alias.get(alias) else {
                continue;
            };

            if std::mem::replace(&mut seen[idx], true) {
                return Err(MinibatchError::parse(
                    line_num,
                    format!("stream '{alias}' appears twice"),
                ));
            }

            let stream = &self.streams[idx];
            let row = if stream.is_sparse {
                parse_sparse(tokens, stream, line_num)?
            } else {
                parse_dense(tokens, stream, line_num)?
            };
            rows[idx].extend(row);
        }

        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(MinibatchError::parse(
                line_num,
                format!("missing stream '{}'", self.streams[missing].alias),
            ));
        }

        Ok(id)
    }
}

fn parse_value(token: &str, line_num: usize) -> Result<f32> {
    token
        .parse()
        .map_err(|_| MinibatchError::parse(line_num, format!("invalid value '{token}'")))
}

fn parse_dense<'a>(
    tokens: impl Iterator<Item = &'a str>,
    stream: &InputStream,
    line_num: usize,
) -> Result<Vec<f32>> {
    let row = tokens
        .map(|t| parse_value(t, line_num))
        .collect::<Result<Vec<_>>>()?;

    if row.len() != stream.dim {
        return Err(MinibatchError::parse(
            line_num,
            format!(
                "stream '{}' has {} values, expected {}",
                stream.alias,
                row.len(),
                stream.dim
            ),
        ));
    }
    Ok(row)
}

fn parse_sparse<'a>(
    tokens: impl Iterator<Item = &'a str>,
    stream: &InputStream,
    line_num: usize,
) -> Result<Vec<f32>> {
    let mut row = vec![0.0; stream.dim];
    for token in tokens {
        let Some((index, value)) = token.split_once(SPARSE_SEPARATOR) else {
            return Err(MinibatchError::parse(
                line_num,
                format!("sparse entry '{token}' is not index:value"),
            ));
        };

        let index: usize = index.parse().map_err(|_| {
            MinibatchError::parse(line_num, format!("invalid sparse index '{index}'"))
        })?;
        if index >= stream.dim {
            return Err(MinibatchError::parse(
                line_num,
                format!(
                    "sparse index {index} out of range for stream '{}' of dim {}",
                    stream.alias, stream.dim
                ),
            ));
        }
        row[index] = parse_value(value, line_num)?;
    }
    Ok(row)
}
