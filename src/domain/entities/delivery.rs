use serde::{Deserialize, Serialize};
use std::fmt;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// 大圏距離（haversine、メートル）
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    Fast,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryZone {
    pub name: String,
    pub center: Coordinates,
    pub radius_meters: f64,
    pub speed: SpeedClass,
}

impl DeliveryZone {
    pub fn contains(&self, point: &Coordinates) -> bool {
        self.center.distance_to(point) <= self.radius_meters
    }
}

/// 地区（近隣エリア）ごとの速度区分表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneTable {
    zones: Vec<DeliveryZone>,
}

impl ZoneTable {
    pub fn new(zones: Vec<DeliveryZone>) -> Self {
        Self { zones }
    }

    pub fn zones(&self) -> &[DeliveryZone] {
        &self.zones
    }

    /// 地点を含む地区のうち中心が最も近いもの
    pub fn resolve(&self, point: &Coordinates) -> Option<&DeliveryZone> {
        self.zones
            .iter()
            .filter(|zone| zone.contains(point))
            .min_by(|a, b| {
                a.center
                    .distance_to(point)
                    .total_cmp(&b.center.distance_to(point))
            })
    }

    /// 同梱の地区表
    pub fn builtin() -> Self {
        let zone = |name: &str, lat: f64, lon: f64, radius: f64, speed: SpeedClass| DeliveryZone {
            name: name.to_string(),
            center: Coordinates::new(lat, lon),
            radius_meters: radius,
            speed,
        };

        Self::new(vec![
            zone("central", -23.5505, -46.6333, 2_500.0, SpeedClass::Normal),
            zone("paulista", -23.5614, -46.6559, 2_000.0, SpeedClass::Fast),
            zone("pinheiros", -23.5670, -46.6920, 2_500.0, SpeedClass::Fast),
            zone("mooca", -23.5587, -46.5997, 3_000.0, SpeedClass::Normal),
            zone("santana", -23.5016, -46.6250, 3_000.0, SpeedClass::Normal),
        ])
    }
}

/// 距離帯ごとの配送料（最小通貨単位）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeTier {
    pub up_to_meters: f64,
    pub fee: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryQuote {
    pub distance_meters: f64,
    pub estimated_minutes: u32,
    pub fee_amount: i64,
    pub zone: Option<String>,
    pub speed: SpeedClass,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndeliverableReason {
    MissingOrigin,
    MissingDestination,
    InvalidCoordinates,
    OutOfRange { distance_meters: f64, max_meters: f64 },
}

impl fmt::Display for UndeliverableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndeliverableReason::MissingOrigin => write!(f, "Store location is not available"),
            UndeliverableReason::MissingDestination => {
                write!(f, "Delivery address has no coordinates")
            }
            UndeliverableReason::InvalidCoordinates => {
                write!(f, "Delivery coordinates are out of range")
            }
            UndeliverableReason::OutOfRange {
                distance_meters,
                max_meters,
            } => write!(
                f,
                "Address is {:.1} km away; delivery is limited to {:.1} km",
                distance_meters / 1_000.0,
                max_meters / 1_000.0
            ),
        }
    }
}

/// 配送見積もり
///
/// 配送不可のときは数値を持たないので、誤って表示することができない。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryEstimate {
    Deliverable(DeliveryQuote),
    Unavailable(UndeliverableReason),
}

impl DeliveryEstimate {
    pub fn can_deliver(&self) -> bool {
        matches!(self, DeliveryEstimate::Deliverable(_))
    }

    pub fn quote(&self) -> Option<&DeliveryQuote> {
        match self {
            DeliveryEstimate::Deliverable(quote) => Some(quote),
            DeliveryEstimate::Unavailable(_) => None,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            DeliveryEstimate::Deliverable(_) => None,
            DeliveryEstimate::Unavailable(reason) => Some(reason.to_string()),
        }
    }
}
