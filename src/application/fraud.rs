use crate::config::FraudConfig;
use crate::domain::fraud::{FraudAssessment, RiskLevel};
use crate::domain::ports::{
    CustomerDirectoryRef, CustomerProfile, IpReputationRef, TransactionStoreRef,
};
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Request facts handed to the fraud engine alongside the customer profile.
///
/// `amount` is the base-currency equivalent of the requested amount, so
/// historical comparisons work across currencies.
pub struct ScreeningContext<'a> {
    pub profile: &'a CustomerProfile,
    pub amount: Decimal,
    pub ip: Option<&'a str>,
    pub country: Option<&'a str>,
    pub device_id: Option<&'a str>,
}

/// Composite fraud scoring over independent additive checks.
///
/// Every check can only add points, so firing more signals never lowers
/// the total. Deposits can be refused outright (blocked country, score at
/// or above the block threshold); withdrawals are scored only and the
/// caller decides what the score means.
pub struct FraudEngine {
    config: FraudConfig,
    store: TransactionStoreRef,
    reputation: IpReputationRef,
    directory: CustomerDirectoryRef,
}

impl FraudEngine {
    pub fn new(
        config: FraudConfig,
        store: TransactionStoreRef,
        reputation: IpReputationRef,
        directory: CustomerDirectoryRef,
    ) -> Self {
        Self {
            config,
            store,
            reputation,
            directory,
        }
    }

    pub async fn assess_deposit(&self, ctx: &ScreeningContext<'_>) -> Result<FraudAssessment> {
        let mut card = ScoreCard::default();

        self.velocity_points(&mut card, &ctx.profile.user_id).await?;
        self.ip_points(&mut card, ctx.ip).await?;
        self.geography_points(&mut card, ctx.country);
        self.anomaly_points(&mut card, ctx.amount, ctx.profile.average_transaction_amount);
        self.device_points(&mut card, ctx.device_id).await?;

        if card.score >= self.config.deposit_block_score {
            card.block("high fraud risk score");
        }

        let assessment = card.into_assessment(RiskLevel::for_deposit);
        debug!(
            user = %ctx.profile.user_id,
            score = assessment.score,
            level = ?assessment.level,
            "deposit screened"
        );
        if assessment.blocked {
            warn!(
                user = %ctx.profile.user_id,
                score = assessment.score,
                reason = ?assessment.block_reason,
                "deposit refused by fraud screening"
            );
        }
        Ok(assessment)
    }

    pub async fn assess_withdrawal(&self, ctx: &ScreeningContext<'_>) -> Result<FraudAssessment> {
        let mut card = ScoreCard::default();

        self.account_age_points(&mut card, ctx.profile.created_at);
        self.velocity_points(&mut card, &ctx.profile.user_id).await?;
        self.ip_change_points(&mut card, ctx.ip, ctx.profile.last_known_ip.as_deref());
        self.pattern_points(&mut card, ctx.amount, ctx.profile);

        let assessment = card.into_assessment(RiskLevel::for_withdrawal);
        debug!(
            user = %ctx.profile.user_id,
            score = assessment.score,
            level = ?assessment.level,
            "withdrawal screened"
        );
        Ok(assessment)
    }

    async fn velocity_points(&self, card: &mut ScoreCard, user_id: &str) -> Result<()> {
        let now = Utc::now();
        let recent = self
            .store
            .list_for_user_since(user_id, now - Duration::days(1))
            .await?;
        let day_count = recent.len() as u32;
        let hour_count = recent
            .iter()
            .filter(|t| t.created_at >= now - Duration::hours(1))
            .count() as u32;

        let hourly_max = self.config.max_hourly_transactions;
        if hour_count > hourly_max {
            card.add(
                "velocity",
                40,
                format!("{hour_count} transactions in the last hour"),
            );
        } else if hour_count > hourly_max / 2 {
            card.add(
                "velocity",
                20,
                format!("{hour_count} transactions in the last hour"),
            );
        }

        let daily_max = self.config.max_daily_transactions;
        if day_count > daily_max {
            card.add(
                "velocity",
                30,
                format!("{day_count} transactions in the last day"),
            );
        } else if day_count > daily_max / 2 {
            card.add(
                "velocity",
                15,
                format!("{day_count} transactions in the last day"),
            );
        }
        Ok(())
    }

    async fn ip_points(&self, card: &mut ScoreCard, ip: Option<&str>) -> Result<()> {
        let Some(ip) = ip else { return Ok(()) };
        let rep = self.reputation.lookup(ip).await?;
        if rep.is_tor {
            card.add("ip_reputation", 30, format!("{ip} is a tor exit node"));
        }
        if rep.is_proxy || rep.is_vpn {
            card.add("ip_reputation", 20, format!("{ip} is a proxy or vpn"));
        }
        if rep.is_datacenter {
            card.add("ip_reputation", 10, format!("{ip} is a datacenter address"));
        }
        if rep.score < self.config.min_ip_reputation_score {
            card.add(
                "ip_reputation",
                20,
                format!("{ip} has reputation score {}", rep.score),
            );
        }
        Ok(())
    }

    fn geography_points(&self, card: &mut ScoreCard, country: Option<&str>) {
        let Some(country) = country else { return };
        if self.config.blocked_countries.iter().any(|c| c == country) {
            card.add("geography", 100, format!("country {country} is blocked"));
            card.block("blocked country");
        } else if self.config.high_risk_countries.iter().any(|c| c == country) {
            card.add("geography", 30, format!("country {country} is high risk"));
        }
    }

    fn anomaly_points(&self, card: &mut ScoreCard, base_amount: Decimal, average: Decimal) {
        // First transaction ever: no baseline to compare against.
        if average <= Decimal::ZERO {
            return;
        }
        let ratio = base_amount / average;
        let points = if ratio > dec!(10) {
            30
        } else if ratio > dec!(5) {
            20
        } else if ratio > dec!(3) {
            10
        } else {
            0
        };
        if points > 0 {
            card.add(
                "amount_anomaly",
                points,
                format!("amount is {}x the customer average", ratio.round_dp(1)),
            );
        }
    }

    async fn device_points(&self, card: &mut ScoreCard, device_id: Option<&str>) -> Result<()> {
        let Some(device) = device_id else {
            return Ok(());
        };
        let failures = self.directory.device_failure_count(device).await?;
        if failures > 5 {
            card.add(
                "device",
                40,
                format!("device has {failures} failed transactions"),
            );
        } else if failures > 2 {
            card.add(
                "device",
                20,
                format!("device has {failures} failed transactions"),
            );
        }
        Ok(())
    }

    fn account_age_points(&self, card: &mut ScoreCard, created_at: DateTime<Utc>) {
        let age = Utc::now() - created_at;
        let points = if age < Duration::days(1) {
            40
        } else if age < Duration::days(7) {
            20
        } else if age < Duration::days(30) {
            10
        } else {
            0
        };
        if points > 0 {
            card.add(
                "account_age",
                points,
                format!("account is {} days old", age.num_days()),
            );
        }
    }

    fn ip_change_points(&self, card: &mut ScoreCard, ip: Option<&str>, last: Option<&str>) {
        if let (Some(ip), Some(last)) = (ip, last)
            && ip != last
            && !same_ipv4_subnet(ip, last)
        {
            card.add(
                "ip_change",
                25,
                format!("request ip {ip} differs from last known {last}"),
            );
        }
    }

    fn pattern_points(&self, card: &mut ScoreCard, base_amount: Decimal, profile: &CustomerProfile) {
        if profile.total_deposited <= Decimal::ZERO {
            card.add(
                "withdrawal_pattern",
                30,
                "withdrawal with no deposit history",
            );
            return;
        }
        let ratio = (profile.total_withdrawn + base_amount) / profile.total_deposited;
        let points = if ratio > Decimal::ONE {
            20
        } else if ratio > dec!(0.9) {
            10
        } else {
            0
        };
        if points > 0 {
            card.add(
                "withdrawal_pattern",
                points,
                format!(
                    "withdrawing {}% of lifetime deposits",
                    (ratio * dec!(100)).round_dp(0)
                ),
            );
        }
    }
}

/// Both addresses sit in the same IPv4 /24.
fn same_ipv4_subnet(a: &str, b: &str) -> bool {
    fn octets(s: &str) -> Option<Vec<&str>> {
        let parts: Vec<&str> = s.split('.').collect();
        (parts.len() == 4).then_some(parts)
    }
    match (octets(a), octets(b)) {
        (Some(a), Some(b)) => a[..3] == b[..3],
        _ => false,
    }
}

#[derive(Default)]
struct ScoreCard {
    score: u32,
    flags: Vec<String>,
    breakdown: BTreeMap<String, u32>,
    blocked: bool,
    block_reason: Option<String>,
}

impl ScoreCard {
    fn add(&mut self, check: &str, points: u32, flag: impl Into<String>) {
        self.score += points;
        *self.breakdown.entry(check.to_string()).or_insert(0) += points;
        self.flags.push(flag.into());
    }

    /// The first block reason sticks.
    fn block(&mut self, reason: &str) {
        self.blocked = true;
        if self.block_reason.is_none() {
            self.block_reason = Some(reason.to_string());
        }
    }

    fn into_assessment(self, band: fn(u32) -> RiskLevel) -> FraudAssessment {
        FraudAssessment {
            score: self.score,
            level: band(self.score),
            flags: self.flags,
            blocked: self.blocked,
            block_reason: self.block_reason,
            breakdown: self.breakdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{IpReputation, TransactionStore, VerificationTier};
    use crate::domain::transaction::{PaymentMethod, Transaction, TransactionType};
    use crate::infrastructure::in_memory::{InMemoryCustomerDirectory, InMemoryTransactionStore};
    use crate::infrastructure::sandbox::StaticIpReputation;
    use std::sync::Arc;

    fn profile(user: &str) -> CustomerProfile {
        CustomerProfile {
            user_id: user.to_string(),
            tier: VerificationTier::Verified,
            country: "US".to_string(),
            created_at: Utc::now() - Duration::days(365),
            last_known_ip: None,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            average_transaction_amount: Decimal::ZERO,
            completed_transactions: 0,
            deposit_methods: vec![],
        }
    }

    fn engine() -> (FraudEngine, Arc<InMemoryTransactionStore>, Arc<StaticIpReputation>) {
        let store = Arc::new(InMemoryTransactionStore::new());
        let reputation = Arc::new(StaticIpReputation::new());
        let directory = Arc::new(InMemoryCustomerDirectory::new());
        let engine = FraudEngine::new(
            FraudConfig::default(),
            store.clone(),
            reputation.clone(),
            directory,
        );
        (engine, store, reputation)
    }

    async fn seed_transactions(store: &InMemoryTransactionStore, user: &str, count: u32, age: Duration) {
        for _ in 0..count {
            let mut tx = Transaction::new(
                TransactionType::Deposit,
                user,
                PaymentMethod::Card,
                "cardpay",
                dec!(25),
                dec!(0.73),
                "USD",
            );
            tx.created_at = Utc::now() - age;
            store.insert(tx).await.unwrap();
        }
    }

    fn ctx<'a>(profile: &'a CustomerProfile, amount: Decimal) -> ScreeningContext<'a> {
        ScreeningContext {
            profile,
            amount,
            ip: None,
            country: None,
            device_id: None,
        }
    }

    #[tokio::test]
    async fn test_clean_deposit_scores_zero() {
        let (engine, _, _) = engine();
        let p = profile("clean");
        let assessment = engine.assess_deposit(&ctx(&p, dec!(100))).await.unwrap();

        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.level, RiskLevel::Low);
        assert!(!assessment.blocked);
        assert!(assessment.flags.is_empty());
    }

    #[tokio::test]
    async fn test_hourly_velocity_tiers() {
        let (engine, store, _) = engine();
        let p = profile("burst");

        seed_transactions(&store, "burst", 6, Duration::minutes(10)).await;
        let mild = engine.assess_deposit(&ctx(&p, dec!(100))).await.unwrap();
        assert_eq!(mild.breakdown.get("velocity"), Some(&20));

        seed_transactions(&store, "burst", 5, Duration::minutes(10)).await;
        let heavy = engine.assess_deposit(&ctx(&p, dec!(100))).await.unwrap();
        assert_eq!(heavy.breakdown.get("velocity"), Some(&40));
    }

    #[tokio::test]
    async fn test_daily_velocity_stacks_with_hourly() {
        let (engine, store, _) = engine();
        let p = profile("allday");

        // 8 in the last hour plus 20 earlier today: hourly mild + daily mild.
        seed_transactions(&store, "allday", 8, Duration::minutes(5)).await;
        seed_transactions(&store, "allday", 20, Duration::hours(5)).await;

        let assessment = engine.assess_deposit(&ctx(&p, dec!(100))).await.unwrap();
        assert_eq!(assessment.breakdown.get("velocity"), Some(&35));
    }

    #[tokio::test]
    async fn test_tor_exit_and_low_reputation_stack() {
        let (engine, _, reputation) = engine();
        reputation
            .set(
                "198.51.100.7",
                IpReputation {
                    is_tor: true,
                    is_proxy: false,
                    is_vpn: false,
                    is_datacenter: true,
                    score: 10,
                },
            )
            .await;
        let p = profile("shady");
        let mut c = ctx(&p, dec!(100));
        c.ip = Some("198.51.100.7");

        let assessment = engine.assess_deposit(&c).await.unwrap();
        assert_eq!(assessment.breakdown.get("ip_reputation"), Some(&60));
        assert_eq!(assessment.level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_blocked_country_refuses_outright() {
        let (engine, _, _) = engine();
        let p = profile("sanctioned");
        let mut c = ctx(&p, dec!(100));
        c.country = Some("KP");

        let assessment = engine.assess_deposit(&c).await.unwrap();
        assert!(assessment.blocked);
        assert_eq!(assessment.block_reason.as_deref(), Some("blocked country"));
        assert_eq!(assessment.level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_high_risk_country_scores_without_blocking() {
        let (engine, _, _) = engine();
        let p = profile("frontier");
        let mut c = ctx(&p, dec!(100));
        c.country = Some("AF");

        let assessment = engine.assess_deposit(&c).await.unwrap();
        assert!(!assessment.blocked);
        assert_eq!(assessment.breakdown.get("geography"), Some(&30));
    }

    #[tokio::test]
    async fn test_amount_anomaly_ratios() {
        let (engine, _, _) = engine();
        let mut p = profile("spender");
        p.average_transaction_amount = dec!(100);

        let mild = engine.assess_deposit(&ctx(&p, dec!(350))).await.unwrap();
        assert_eq!(mild.breakdown.get("amount_anomaly"), Some(&10));

        let heavy = engine.assess_deposit(&ctx(&p, dec!(1500))).await.unwrap();
        assert_eq!(heavy.breakdown.get("amount_anomaly"), Some(&30));

        let normal = engine.assess_deposit(&ctx(&p, dec!(150))).await.unwrap();
        assert!(normal.breakdown.get("amount_anomaly").is_none());
    }

    #[tokio::test]
    async fn test_first_deposit_skips_anomaly_check() {
        let (engine, _, _) = engine();
        let p = profile("newcomer");

        let assessment = engine.assess_deposit(&ctx(&p, dec!(900))).await.unwrap();
        assert!(assessment.breakdown.get("amount_anomaly").is_none());
    }

    #[tokio::test]
    async fn test_score_at_block_threshold_refuses() {
        let (engine, _, reputation) = engine();
        reputation
            .set(
                "203.0.113.9",
                IpReputation {
                    is_tor: true,
                    is_proxy: true,
                    is_vpn: false,
                    is_datacenter: true,
                    score: 5,
                },
            )
            .await;
        let p = profile("threshold");
        let mut c = ctx(&p, dec!(100));
        c.ip = Some("203.0.113.9");

        // 30 + 20 + 10 + 20 lands exactly on the block threshold.
        let assessment = engine.assess_deposit(&c).await.unwrap();
        assert_eq!(assessment.score, 80);
        assert!(assessment.blocked);
        assert_eq!(
            assessment.block_reason.as_deref(),
            Some("high fraud risk score")
        );
    }

    #[tokio::test]
    async fn test_withdrawal_account_age_bands() {
        let (engine, _, _) = engine();

        let mut p = profile("fresh");
        p.total_deposited = dec!(1000);
        p.created_at = Utc::now() - Duration::hours(6);
        let brand_new = engine.assess_withdrawal(&ctx(&p, dec!(10))).await.unwrap();
        assert_eq!(brand_new.breakdown.get("account_age"), Some(&40));

        p.created_at = Utc::now() - Duration::days(3);
        let young = engine.assess_withdrawal(&ctx(&p, dec!(10))).await.unwrap();
        assert_eq!(young.breakdown.get("account_age"), Some(&20));

        p.created_at = Utc::now() - Duration::days(20);
        let settled = engine.assess_withdrawal(&ctx(&p, dec!(10))).await.unwrap();
        assert_eq!(settled.breakdown.get("account_age"), Some(&10));

        p.created_at = Utc::now() - Duration::days(90);
        let mature = engine.assess_withdrawal(&ctx(&p, dec!(10))).await.unwrap();
        assert!(mature.breakdown.get("account_age").is_none());
    }

    #[tokio::test]
    async fn test_ip_change_respects_subnet() {
        let (engine, _, _) = engine();
        let mut p = profile("roamer");
        p.total_deposited = dec!(1000);
        p.last_known_ip = Some("203.0.113.7".to_string());

        let mut moved = ctx(&p, dec!(10));
        moved.ip = Some("198.51.100.9");
        let flagged = engine.assess_withdrawal(&moved).await.unwrap();
        assert_eq!(flagged.breakdown.get("ip_change"), Some(&25));

        let mut nearby = ctx(&p, dec!(10));
        nearby.ip = Some("203.0.113.99");
        let clean = engine.assess_withdrawal(&nearby).await.unwrap();
        assert!(clean.breakdown.get("ip_change").is_none());
    }

    #[tokio::test]
    async fn test_withdrawal_pattern_ratios() {
        let (engine, _, _) = engine();

        let mut p = profile("drainer");
        p.total_deposited = dec!(1000);
        p.total_withdrawn = dec!(900);
        let over = engine.assess_withdrawal(&ctx(&p, dec!(150))).await.unwrap();
        assert_eq!(over.breakdown.get("withdrawal_pattern"), Some(&20));

        let near = engine.assess_withdrawal(&ctx(&p, dec!(50))).await.unwrap();
        assert_eq!(near.breakdown.get("withdrawal_pattern"), Some(&10));

        let calm = engine.assess_withdrawal(&ctx(&p, dec!(10))).await.unwrap();
        assert!(calm.breakdown.get("withdrawal_pattern").is_none());
    }

    #[tokio::test]
    async fn test_withdrawal_without_deposits_flags() {
        let (engine, _, _) = engine();
        let p = profile("ghost");

        let assessment = engine.assess_withdrawal(&ctx(&p, dec!(10))).await.unwrap();
        assert_eq!(assessment.breakdown.get("withdrawal_pattern"), Some(&30));
    }

    #[tokio::test]
    async fn test_withdrawals_never_block() {
        let (engine, store, _) = engine();
        let mut p = profile("hot");
        p.created_at = Utc::now() - Duration::hours(2);
        seed_transactions(&store, "hot", 12, Duration::minutes(3)).await;

        let assessment = engine.assess_withdrawal(&ctx(&p, dec!(10))).await.unwrap();
        assert!(assessment.score >= 70);
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(!assessment.blocked);
    }

    #[test]
    fn test_subnet_comparison() {
        assert!(same_ipv4_subnet("10.1.2.3", "10.1.2.250"));
        assert!(!same_ipv4_subnet("10.1.2.3", "10.1.3.3"));
        assert!(!same_ipv4_subnet("10.1.2.3", "not-an-ip"));
    }
}
