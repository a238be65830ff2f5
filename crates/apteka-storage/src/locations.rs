//! Locations repository and nearest-place lookup.
//!
//! Candidates are ordered in SQL with an equirectangular approximation,
//! then the reported distance is the haversine great-circle distance.

use std::sync::Arc;

use apteka_core::error::AptekaError;
use apteka_core::types::Coordinates;
use async_trait::async_trait;
use tracing::debug;

use crate::db::Database;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A place to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    pub text: String,
    pub coordinates: Coordinates,
}

/// A place near the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyPlace {
    pub text: String,
    pub distance_m: f64,
}

impl NearbyPlace {
    /// Single line suitable for reading aloud, e.g. `Аптека 5, Ленина 10 (350 м)`.
    pub fn spoken_line(&self) -> String {
        format!("{} ({} м)", self.text, self.distance_m.round() as u64)
    }
}

/// External geospatial nearest-neighbour service.
#[async_trait]
pub trait NearbyLocator: Send + Sync {
    /// Up to `limit` places ordered by increasing distance.
    async fn nearest(
        &self,
        coordinates: Coordinates,
        limit: usize,
    ) -> Result<Vec<NearbyPlace>, AptekaError>;
}

/// Great-circle distance in metres.
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Repository for the `locations` table.
#[derive(Debug, Clone)]
pub struct LocationRepository {
    db: Arc<Database>,
}

impl LocationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert one place and return its row id.
    pub fn insert(&self, location: &NewLocation) -> Result<i64, AptekaError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO locations (text, latitude, longitude) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    location.text,
                    location.coordinates.latitude,
                    location.coordinates.longitude,
                ],
            )
            .map_err(|e| AptekaError::Storage(format!("Failed to insert location: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Insert many places in one transaction.
    pub fn insert_batch(&self, locations: &[NewLocation]) -> Result<usize, AptekaError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| AptekaError::Storage(format!("Failed to begin transaction: {}", e)))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO locations (text, latitude, longitude) VALUES (?1, ?2, ?3)",
                    )
                    .map_err(|e| AptekaError::Storage(e.to_string()))?;
                for location in locations {
                    stmt.execute(rusqlite::params![
                        location.text,
                        location.coordinates.latitude,
                        location.coordinates.longitude,
                    ])
                    .map_err(|e| AptekaError::Storage(format!("Failed to insert location: {}", e)))?;
                }
            }
            tx.commit()
                .map_err(|e| AptekaError::Storage(format!("Failed to commit: {}", e)))?;
            Ok(locations.len())
        })
    }

    pub fn count(&self) -> Result<u64, AptekaError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM locations", [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(|e| AptekaError::Storage(e.to_string()))
        })
    }

    /// Synchronous nearest query.
    pub fn nearest(
        &self,
        origin: Coordinates,
        limit: usize,
    ) -> Result<Vec<NearbyPlace>, AptekaError> {
        let cos_lat = origin.latitude.to_radians().cos();

        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT text, latitude, longitude FROM locations
                     ORDER BY ((latitude - ?1) * (latitude - ?1)
                             + ((longitude - ?2) * ?3) * ((longitude - ?2) * ?3))
                     LIMIT ?4",
                )
                .map_err(|e| AptekaError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![origin.latitude, origin.longitude, cos_lat, limit as i64],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, f64>(2)?,
                        ))
                    },
                )
                .map_err(|e| AptekaError::Storage(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AptekaError::Storage(e.to_string()))?;
            Ok(rows)
        })?;

        let mut places: Vec<NearbyPlace> = rows
            .into_iter()
            .map(|(text, latitude, longitude)| NearbyPlace {
                text,
                distance_m: haversine_m(
                    origin,
                    Coordinates {
                        latitude,
                        longitude,
                    },
                ),
            })
            .collect();
        places.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(found = places.len(), "Nearest locations resolved");
        Ok(places)
    }
}

/// [`NearbyLocator`] backed by the SQLite `locations` table.
#[derive(Debug, Clone)]
pub struct SqliteLocator {
    repo: LocationRepository,
}

impl SqliteLocator {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: LocationRepository::new(db),
        }
    }
}

#[async_trait]
impl NearbyLocator for SqliteLocator {
    async fn nearest(
        &self,
        coordinates: Coordinates,
        limit: usize,
    ) -> Result<Vec<NearbyPlace>, AptekaError> {
        // rusqlite is blocking; keep it off the async workers.
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || repo.nearest(coordinates, limit))
            .await
            .map_err(|e| AptekaError::Storage(format!("Nearest lookup task panicked: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(lat: f64, lon: f64) -> Coordinates {
        Coordinates::new(lat, lon).unwrap()
    }

    fn seeded() -> Arc<Database> {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = LocationRepository::new(db.clone());
        repo.insert_batch(&[
            NewLocation {
                text: "Аптека 1, Минск, Независимости 1".to_string(),
                coordinates: coords(53.8930, 27.5480),
            },
            NewLocation {
                text: "Аптека 2, Минск, Немига 5".to_string(),
                coordinates: coords(53.9040, 27.5540),
            },
            NewLocation {
                text: "Аптека 3, Гомель, Советская 10".to_string(),
                coordinates: coords(52.4410, 30.9870),
            },
        ])
        .unwrap();
        db
    }

    #[test]
    fn test_insert_and_count() {
        let db = Arc::new(Database::in_memory().unwrap());
        let repo = LocationRepository::new(db);
        let id = repo
            .insert(&NewLocation {
                text: "Аптека".to_string(),
                coordinates: coords(53.9, 27.56),
            })
            .unwrap();
        assert!(id > 0);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_nearest_orders_by_distance_and_limits() {
        let repo = LocationRepository::new(seeded());
        let places = repo.nearest(coords(53.9045, 27.5545), 2).unwrap();
        assert_eq!(places.len(), 2);
        assert!(places[0].text.contains("Немига"));
        assert!(places[1].text.contains("Независимости"));
        assert!(places[0].distance_m < places[1].distance_m);
        assert!(places[0].distance_m < 100.0);
    }

    #[test]
    fn test_nearest_empty_table() {
        let repo = LocationRepository::new(Arc::new(Database::in_memory().unwrap()));
        assert!(repo.nearest(coords(0.0, 0.0), 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_locator_async() {
        let locator = SqliteLocator::new(seeded());
        let places = locator.nearest(coords(52.44, 30.98), 1).await.unwrap();
        assert_eq!(places.len(), 1);
        assert!(places[0].text.contains("Гомель"));
    }

    #[test]
    fn test_haversine_known_distance() {
        // Minsk to Gomel is roughly 280 km.
        let d = haversine_m(coords(53.9, 27.5667), coords(52.4345, 30.9754));
        assert!((270_000.0..300_000.0).contains(&d), "got {}", d);
        assert_eq!(haversine_m(coords(10.0, 10.0), coords(10.0, 10.0)), 0.0);
    }

    #[test]
    fn test_spoken_line_rounds_metres() {
        let place = NearbyPlace {
            text: "Аптека 2".to_string(),
            distance_m: 349.6,
        };
        assert_eq!(place.spoken_line(), "Аптека 2 (350 м)");
    }
}
