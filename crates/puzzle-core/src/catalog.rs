//! Static piece catalog: names, statistics and referenced movies.
//!
//! The catalog is index-aligned with the piece set and never changes
//! after loading.

use serde::{Deserialize, Serialize};

use crate::state::IslandType;

/// Number of comma-separated fields in one piece row.
pub const PIECE_ROW_FIELDS: usize = 14;

/// Error type for catalog loading.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("row {row}: expected {PIECE_ROW_FIELDS} fields, got {actual}")]
    RowArity { row: usize, actual: usize },
    #[error("row {row}: unknown island type {value:?}")]
    BadIsland { row: usize, value: String },
    #[error("movie {title:?}: bad piece id {value:?}")]
    BadMovieId { title: String, value: String },
    #[error("movie line {line}: expected `title<TAB>ids`")]
    MovieLine { line: usize },
    #[error("catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One row of the piece table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    pub id: String,
    pub object_name: String,
    pub name: String,
    pub name_kana: String,
    pub group: String,
    pub description: String,
    pub area: String,
    pub area_unit: String,
    pub population: String,
    pub population_year: String,
    pub population_month: String,
    pub population_day: String,
    pub population_display_type: String,
    pub island: IslandType,
}

impl PieceInfo {
    /// Parses a comma-separated row. Extra trailing fields are ignored.
    pub fn from_row(row: usize, line: &str) -> Result<Self, CatalogError> {
        let f: Vec<&str> = line.split(',').map(str::trim).collect();
        if f.len() < PIECE_ROW_FIELDS {
            return Err(CatalogError::RowArity {
                row,
                actual: f.len(),
            });
        }
        let island = f[13]
            .parse::<i64>()
            .ok()
            .and_then(IslandType::from_code)
            .ok_or_else(|| CatalogError::BadIsland {
                row,
                value: f[13].to_string(),
            })?;
        Ok(Self {
            id: f[0].to_string(),
            object_name: f[1].to_string(),
            name: f[2].to_string(),
            name_kana: f[3].to_string(),
            group: f[4].to_string(),
            description: f[5].to_string(),
            area: f[6].to_string(),
            area_unit: f[7].to_string(),
            population: f[8].to_string(),
            population_year: f[9].to_string(),
            population_month: f[10].to_string(),
            population_day: f[11].to_string(),
            population_display_type: f[12].to_string(),
            island,
        })
    }

    /// `面積: ...` line of the detail card.
    pub fn area_text(&self) -> String {
        format!("面積: {}{}", self.area, self.area_unit)
    }

    /// `人口: ...` line of the detail card.
    pub fn population_text(&self) -> String {
        let raw = self.population_display_type.trim().parse::<i32>().ok() == Some(1);
        if raw {
            if self.population == "-" {
                return "人口: -".to_string();
            }
            return format!("人口: {} ({}年)", self.population, self.population_year);
        }
        match self.population.trim().parse::<i64>() {
            Ok(value) => format!("人口: {} ({}年)", group_digits(value), self.population_year),
            Err(_) => "人口: -".to_string(),
        }
    }

    /// Header block: group (when set), area and population.
    pub fn header_text(&self) -> String {
        let mut header = String::new();
        if !self.group.is_empty() && self.group != "-" {
            header.push_str(&self.group);
            header.push('\n');
        }
        header.push_str(&self.area_text());
        header.push('\n');
        header.push_str(&self.population_text());
        header
    }
}

/// Everything shown on a piece's detail board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailCard {
    pub title: String,
    pub kana: String,
    pub header: String,
    pub description: String,
    pub movies: Vec<String>,
}

/// Piece table plus movie titles and the per-piece movie index table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub pieces: Vec<PieceInfo>,
    #[serde(default)]
    pub movie_titles: Vec<String>,
    /// Movie title indices per piece.
    #[serde(default)]
    pub movie_table: Vec<Vec<usize>>,
}

impl Catalog {
    /// Builds a catalog from piece rows (comma or tab separated, one per
    /// line) and movie rows (`title<TAB>piece ids`).
    pub fn from_rows(pieces: &str, movies: &str) -> Result<Self, CatalogError> {
        let pieces = pieces
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(row, line)| PieceInfo::from_row(row, &line.replace('\t', ",")))
            .collect::<Result<Vec<_>, _>>()?;

        let mut movie_titles = Vec::new();
        let mut movie_table = vec![Vec::new(); pieces.len()];
        for (line_no, line) in movies.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let (title, ids) = line
                .split_once('\t')
                .ok_or(CatalogError::MovieLine { line: line_no })?;
            let title_index = movie_titles.len();
            movie_titles.push(title.to_string());
            for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let piece = id
                    .parse::<usize>()
                    .ok()
                    .filter(|&p| p < pieces.len())
                    .ok_or_else(|| CatalogError::BadMovieId {
                        title: title.to_string(),
                        value: id.to_string(),
                    })?;
                movie_table[piece].push(title_index);
            }
        }
        for entry in &mut movie_table {
            entry.sort_unstable();
            entry.dedup();
        }

        tracing::debug!(
            "[catalog] loaded {} pieces, {} movies",
            pieces.len(),
            movie_titles.len()
        );
        Ok(Self {
            pieces,
            movie_titles,
            movie_table,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, CatalogError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PieceInfo> {
        self.pieces.get(index)
    }

    /// Titles of the movies that reference a piece. Unknown title
    /// indices are skipped.
    pub fn movies_for(&self, index: usize) -> Vec<&str> {
        self.movie_table
            .get(index)
            .map(|ids| {
                ids.iter()
                    .filter_map(|&i| self.movie_titles.get(i).map(String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn detail_card(&self, index: usize) -> Option<DetailCard> {
        let info = self.get(index)?;
        Some(DetailCard {
            title: info.name.clone(),
            kana: info.name_kana.clone(),
            header: info.header_text(),
            description: info.description.replace("\\n", "\n"),
            movies: self
                .movies_for(index)
                .into_iter()
                .map(str::to_string)
                .collect(),
        })
    }
}

fn group_digits(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
