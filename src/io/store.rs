use crate::types::{
    GeoPoint, Platform, PipelineError, PipelineResult, Poi, PoiId, PoiQuery, ProviderFilters, Tile, TileId,
    TilePoi,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS tiles (
        id                      INTEGER PRIMARY KEY AUTOINCREMENT,
        platform                TEXT NOT NULL,
        product_id              TEXT NOT NULL,
        folder_name             TEXT NOT NULL,
        download_requested_at   TEXT,
        download_completed_at   TEXT,
        unzipped_at             TEXT,
        UNIQUE (platform, product_id)
    );

    CREATE INDEX IF NOT EXISTS idx_tiles_folder_name ON tiles(folder_name);

    CREATE TABLE IF NOT EXISTS pois (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        lat             REAL NOT NULL,
        lon             REAL NOT NULL,
        date_from       TEXT NOT NULL,
        date_to         TEXT NOT NULL,
        platform        TEXT NOT NULL,
        width           REAL NOT NULL,
        height          REAL NOT NULL,
        filters         TEXT NOT NULL,
        country         TEXT,
        identified_at   TEXT,
        UNIQUE (lat, lon, date_from, date_to, platform, width, height, filters)
    );

    CREATE TABLE IF NOT EXISTS tile_pois (
        poi_id      INTEGER NOT NULL REFERENCES pois(id),
        tile_id     INTEGER NOT NULL REFERENCES tiles(id),
        cropped_at  TEXT,
        PRIMARY KEY (poi_id, tile_id)
    );
";

const TILE_COLUMNS: &str =
    "id, platform, product_id, folder_name, download_requested_at, download_completed_at, unzipped_at";

impl ToSql for Platform {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Platform {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|_| FromSqlError::InvalidType)
    }
}

/// Counts of tiles, POIs and pairs per lifecycle stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub tiles: usize,
    pub download_requested: usize,
    pub download_completed: usize,
    pub unzipped: usize,
    pub pois: usize,
    pub identified_pois: usize,
    pub tile_pois: usize,
    pub cropped_tile_pois: usize,
}

/// Persistent registry of tiles, POIs and their associations.
///
/// Every operation is safe to repeat with identical arguments. Find-or-create
/// operations insert-if-absent and then select, so concurrent writers sharing
/// the database cannot produce duplicate rows. Lifecycle timestamps are only
/// ever filled, never moved or cleared.
pub struct TileStore {
    conn: Connection,
}

impl TileStore {
    /// Open (or create) the state database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        log::info!("Opening tile state store: {}", path.as_ref().display());
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Store that lives only as long as the process, for dry runs and tests
    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PipelineResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn find_tile_by_product_id(&self, platform: Platform, product_id: &str) -> PipelineResult<Option<Tile>> {
        let sql = format!("SELECT {} FROM tiles WHERE platform = ?1 AND product_id = ?2", TILE_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![platform, product_id], tile_from_row)
            .optional()?)
    }

    pub fn find_tile_by_folder_name(&self, folder_name: &str) -> PipelineResult<Option<Tile>> {
        let sql = format!("SELECT {} FROM tiles WHERE folder_name = ?1 ORDER BY id LIMIT 1", TILE_COLUMNS);
        Ok(self.conn.query_row(&sql, params![folder_name], tile_from_row).optional()?)
    }

    pub fn get_tile(&self, tile_id: TileId) -> PipelineResult<Tile> {
        let sql = format!("SELECT {} FROM tiles WHERE id = ?1", TILE_COLUMNS);
        self.conn
            .query_row(&sql, params![tile_id], tile_from_row)
            .optional()?
            .ok_or_else(|| PipelineError::tile_not_found(tile_id))
    }

    /// Register a product, returning the existing id when it is already known.
    /// A changed folder name (provider naming revision) replaces the stored one.
    pub fn register_tile(&self, platform: Platform, product_id: &str, folder_name: &str) -> PipelineResult<TileId> {
        self.conn.execute(
            "INSERT INTO tiles (platform, product_id, folder_name) VALUES (?1, ?2, ?3)
             ON CONFLICT (platform, product_id) DO UPDATE SET folder_name = excluded.folder_name
             WHERE folder_name <> excluded.folder_name",
            params![platform, product_id, folder_name],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM tiles WHERE platform = ?1 AND product_id = ?2",
            params![platform, product_id],
            |row| row.get(0),
        )?;
        log::debug!("Registered tile {} ({} {}) as {}", id, platform, product_id, folder_name);
        Ok(id)
    }

    pub fn record_download_requested(&self, tile_id: TileId) -> PipelineResult<()> {
        self.update_tile(
            tile_id,
            "UPDATE tiles SET download_requested_at = COALESCE(download_requested_at, ?1) WHERE id = ?2",
        )
    }

    /// Mark the archive as fully present; also fills an unset request timestamp
    pub fn record_download_completed(&self, tile_id: TileId) -> PipelineResult<()> {
        self.update_tile(
            tile_id,
            "UPDATE tiles SET
                download_requested_at = COALESCE(download_requested_at, ?1),
                download_completed_at = COALESCE(download_completed_at, ?1)
             WHERE id = ?2",
        )
    }

    /// Mark the product folder as extracted; also fills unset earlier stages
    pub fn record_unzipped(&self, tile_id: TileId) -> PipelineResult<()> {
        self.update_tile(
            tile_id,
            "UPDATE tiles SET
                download_requested_at = COALESCE(download_requested_at, ?1),
                download_completed_at = COALESCE(download_completed_at, ?1),
                unzipped_at = COALESCE(unzipped_at, ?1)
             WHERE id = ?2",
        )
    }

    fn update_tile(&self, tile_id: TileId, sql: &str) -> PipelineResult<()> {
        let changed = self.conn.execute(sql, params![Utc::now(), tile_id])?;
        if changed == 0 {
            return Err(PipelineError::tile_not_found(tile_id));
        }
        Ok(())
    }

    /// Tiles whose archive is complete but not yet unpacked
    pub fn tiles_pending_extraction(&self) -> PipelineResult<Vec<Tile>> {
        let sql = format!(
            "SELECT {} FROM tiles WHERE download_completed_at IS NOT NULL AND unzipped_at IS NULL ORDER BY id",
            TILE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tiles = stmt.query_map([], tile_from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(tiles)
    }

    /// Resolve the POI for a query, creating it on first sight.
    /// A country label fills an unlabelled existing POI but never replaces one.
    pub fn find_or_create_poi(&self, query: &PoiQuery) -> PipelineResult<PoiId> {
        let filters = query.filters.canonical()?;
        let identity = params![
            query.center.lat,
            query.center.lon,
            query.date_from,
            query.date_to,
            query.platform,
            query.width_m,
            query.height_m,
            filters,
        ];

        self.conn.execute(
            "INSERT OR IGNORE INTO pois (lat, lon, date_from, date_to, platform, width, height, filters)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            identity,
        )?;

        let id: PoiId = self.conn.query_row(
            "SELECT id FROM pois
             WHERE lat = ?1 AND lon = ?2 AND date_from = ?3 AND date_to = ?4
               AND platform = ?5 AND width = ?6 AND height = ?7 AND filters = ?8",
            identity,
            |row| row.get(0),
        )?;

        if let Some(country) = &query.country {
            self.conn.execute(
                "UPDATE pois SET country = ?1 WHERE id = ?2 AND country IS NULL",
                params![country, id],
            )?;
        }

        Ok(id)
    }

    pub fn get_poi(&self, poi_id: PoiId) -> PipelineResult<Poi> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, lat, lon, date_from, date_to, platform, width, height, filters, country, identified_at
                 FROM pois WHERE id = ?1",
                params![poi_id],
                |row| {
                    Ok((
                        row.get::<_, PoiId>(0)?,
                        GeoPoint::new(row.get(1)?, row.get(2)?),
                        row.get::<_, NaiveDate>(3)?,
                        row.get::<_, NaiveDate>(4)?,
                        row.get::<_, Platform>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, f64>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, Option<DateTime<Utc>>>(10)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| PipelineError::poi_not_found(poi_id))?;

        let (id, center, date_from, date_to, platform, width_m, height_m, filters, country, identified_at) = raw;
        Ok(Poi {
            id,
            query: PoiQuery {
                center,
                date_from,
                date_to,
                platform,
                width_m,
                height_m,
                filters: ProviderFilters::from_canonical(&filters)?,
                country,
            },
            identified_at,
        })
    }

    /// Signal that tile discovery for this POI is complete
    pub fn mark_poi_identified(&self, poi_id: PoiId) -> PipelineResult<()> {
        let changed = self.conn.execute(
            "UPDATE pois SET identified_at = COALESCE(identified_at, ?1) WHERE id = ?2",
            params![Utc::now(), poi_id],
        )?;
        if changed == 0 {
            return Err(PipelineError::poi_not_found(poi_id));
        }
        Ok(())
    }

    /// Link a tile to a POI; returns false when the pair already existed
    pub fn associate_tile_with_poi(&self, poi_id: PoiId, tile_id: TileId) -> PipelineResult<bool> {
        self.ensure_poi(poi_id)?;
        self.get_tile(tile_id)?;

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO tile_pois (poi_id, tile_id) VALUES (?1, ?2)",
            params![poi_id, tile_id],
        )?;
        Ok(inserted == 1)
    }

    pub fn list_tiles_for_poi(&self, poi_id: PoiId) -> PipelineResult<Vec<TilePoi>> {
        self.ensure_poi(poi_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.platform, t.product_id, t.folder_name,
                    t.download_requested_at, t.download_completed_at, t.unzipped_at, tp.cropped_at
             FROM tile_pois tp JOIN tiles t ON t.id = tp.tile_id
             WHERE tp.poi_id = ?1
             ORDER BY t.id",
        )?;
        let pairs = stmt
            .query_map(params![poi_id], |row| {
                Ok(TilePoi {
                    poi_id,
                    tile: tile_from_row(row)?,
                    cropped_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    /// Record that every raster of the tile has been cropped for this POI
    pub fn mark_tile_cropped_for_poi(&self, poi_id: PoiId, tile_id: TileId) -> PipelineResult<()> {
        let changed = self.conn.execute(
            "UPDATE tile_pois SET cropped_at = COALESCE(cropped_at, ?1) WHERE poi_id = ?2 AND tile_id = ?3",
            params![Utc::now(), poi_id, tile_id],
        )?;
        if changed == 0 {
            return Err(PipelineError::NotFound {
                entity: "TilePoi",
                id: format!("{}/{}", poi_id, tile_id),
            });
        }
        Ok(())
    }

    pub fn status_summary(&self) -> PipelineResult<StoreSummary> {
        let count = |sql: &str| -> PipelineResult<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreSummary {
            tiles: count("SELECT COUNT(*) FROM tiles")?,
            download_requested: count("SELECT COUNT(*) FROM tiles WHERE download_requested_at IS NOT NULL")?,
            download_completed: count("SELECT COUNT(*) FROM tiles WHERE download_completed_at IS NOT NULL")?,
            unzipped: count("SELECT COUNT(*) FROM tiles WHERE unzipped_at IS NOT NULL")?,
            pois: count("SELECT COUNT(*) FROM pois")?,
            identified_pois: count("SELECT COUNT(*) FROM pois WHERE identified_at IS NOT NULL")?,
            tile_pois: count("SELECT COUNT(*) FROM tile_pois")?,
            cropped_tile_pois: count("SELECT COUNT(*) FROM tile_pois WHERE cropped_at IS NOT NULL")?,
        })
    }

    fn ensure_poi(&self, poi_id: PoiId) -> PipelineResult<()> {
        let exists: Option<i64> = self
            .conn
            .query_row("SELECT id FROM pois WHERE id = ?1", params![poi_id], |row| row.get(0))
            .optional()?;
        exists.map(|_| ()).ok_or_else(|| PipelineError::poi_not_found(poi_id))
    }
}

fn tile_from_row(row: &Row<'_>) -> rusqlite::Result<Tile> {
    Ok(Tile {
        id: row.get(0)?,
        platform: row.get(1)?,
        product_id: row.get(2)?,
        folder_name: row.get(3)?,
        download_requested_at: row.get(4)?,
        download_completed_at: row.get(5)?,
        unzipped_at: row.get(6)?,
    })
}
