use crate::domain::entities::{
    Coordinates, DeliveryEstimate, DeliveryQuote, FeeTier, SpeedClass, UndeliverableReason,
    ZoneTable,
};
use crate::shared::config::DeliveryConfig;

/// 配送可否と料金・所要時間の算出ルール
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPolicy {
    pub max_radius_meters: f64,
    pub base_preparation_minutes: u32,
    pub normal_speed_meters_per_minute: f64,
    pub fast_speed_multiplier: f64,
    /// `up_to_meters` の昇順
    pub fee_tiers: Vec<FeeTier>,
}

impl DeliveryPolicy {
    pub fn default_fee_tiers() -> Vec<FeeTier> {
        vec![
            FeeTier {
                up_to_meters: 2_000.0,
                fee: 500,
            },
            FeeTier {
                up_to_meters: 5_000.0,
                fee: 900,
            },
            FeeTier {
                up_to_meters: 10_000.0,
                fee: 1_500,
            },
            FeeTier {
                up_to_meters: 15_000.0,
                fee: 2_200,
            },
        ]
    }

    fn speed_meters_per_minute(&self, speed: SpeedClass) -> f64 {
        match speed {
            SpeedClass::Normal => self.normal_speed_meters_per_minute,
            SpeedClass::Fast => self.normal_speed_meters_per_minute * self.fast_speed_multiplier,
        }
    }

    /// 最大半径以内なら必ずどこかの帯に入るよう、表の外は最終帯の料金を使う
    fn fee_for(&self, distance_meters: f64) -> i64 {
        self.fee_tiers
            .iter()
            .find(|tier| distance_meters <= tier.up_to_meters)
            .or_else(|| self.fee_tiers.last())
            .map(|tier| tier.fee)
            .unwrap_or(0)
    }
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_radius_meters: config.max_radius_meters,
            base_preparation_minutes: config.base_preparation_minutes,
            normal_speed_meters_per_minute: config.normal_speed_meters_per_minute,
            fast_speed_multiplier: config.fast_speed_multiplier,
            fee_tiers: Self::default_fee_tiers(),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

/// 出発地と届け先から配送見積もりを出す（副作用なし）
#[derive(Debug, Clone, Default)]
pub struct DeliveryEstimator {
    policy: DeliveryPolicy,
}

impl DeliveryEstimator {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn estimate(
        &self,
        origin: Option<&Coordinates>,
        destination: Option<&Coordinates>,
        zones: &ZoneTable,
    ) -> DeliveryEstimate {
        let Some(origin) = origin else {
            return DeliveryEstimate::Unavailable(UndeliverableReason::MissingOrigin);
        };
        let Some(destination) = destination else {
            return DeliveryEstimate::Unavailable(UndeliverableReason::MissingDestination);
        };
        if !origin.is_valid() || !destination.is_valid() {
            return DeliveryEstimate::Unavailable(UndeliverableReason::InvalidCoordinates);
        }

        let zone = zones.resolve(destination);
        let speed = zone.map(|zone| zone.speed).unwrap_or(SpeedClass::Normal);
        let distance_meters = origin.distance_to(destination);

        self.quote(distance_meters, speed, zone.map(|zone| zone.name.clone()))
    }

    /// 距離が既知の場合の見積もり
    pub fn estimate_for_distance(&self, distance_meters: f64, speed: SpeedClass) -> DeliveryEstimate {
        if !distance_meters.is_finite() || distance_meters < 0.0 {
            return DeliveryEstimate::Unavailable(UndeliverableReason::InvalidCoordinates);
        }
        self.quote(distance_meters, speed, None)
    }

    fn quote(&self, distance_meters: f64, speed: SpeedClass, zone: Option<String>) -> DeliveryEstimate {
        if distance_meters > self.policy.max_radius_meters {
            return DeliveryEstimate::Unavailable(UndeliverableReason::OutOfRange {
                distance_meters,
                max_meters: self.policy.max_radius_meters,
            });
        }

        let travel_minutes =
            (distance_meters / self.policy.speed_meters_per_minute(speed)).ceil() as u32;

        DeliveryEstimate::Deliverable(DeliveryQuote {
            distance_meters,
            estimated_minutes: self.policy.base_preparation_minutes + travel_minutes,
            fee_amount: self.policy.fee_for(distance_meters),
            zone,
            speed,
        })
    }
}
