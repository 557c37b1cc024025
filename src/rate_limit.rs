/// Per-IP rolling-window rate limiting
///
/// Two ceilings per client address: a rolling last-minute count and a
/// rolling last-hour count. Timestamps are pruned before every decision,
/// so limits recover as the window slides rather than at bucket edges.
use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;

pub struct RateLimiter {
    windows: DashMap<IpAddr, VecDeque<DateTime<Utc>>>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            windows: DashMap::new(),
            per_minute,
            per_hour,
        }
    }

    /// Admit or reject a request from `ip`, recording its timestamp when
    /// admitted. Rejected requests are not recorded; a rejected client
    /// recovers as soon as its window slides.
    pub fn check(&self, ip: IpAddr) -> GatewayResult<()> {
        self.check_at(ip, Utc::now())
    }

    pub fn check_at(&self, ip: IpAddr, now: DateTime<Utc>) -> GatewayResult<()> {
        let hour_ago = now - Duration::hours(1);
        let minute_ago = now - Duration::minutes(1);

        let mut window = self.windows.entry(ip).or_default();

        while window.front().is_some_and(|t| *t <= hour_ago) {
            window.pop_front();
        }

        if window.len() >= self.per_hour as usize {
            let retry_after = window
                .front()
                .map(|oldest| *oldest + Duration::hours(1) - now)
                .and_then(|d| d.to_std().ok())
                .unwrap_or_default();
            return Err(GatewayError::RateLimitExceeded { retry_after });
        }

        let minute_count = window.iter().rev().take_while(|t| **t > minute_ago).count();
        if minute_count >= self.per_minute as usize {
            let oldest_in_minute = window.len() - minute_count;
            let retry_after = window
                .get(oldest_in_minute)
                .map(|t| *t + Duration::minutes(1) - now)
                .and_then(|d| d.to_std().ok())
                .unwrap_or_default();
            return Err(GatewayError::RateLimitExceeded { retry_after });
        }

        window.push_back(now);
        Ok(())
    }

    /// Drop addresses whose whole window has aged out
    pub fn sweep(&self) {
        self.sweep_at(Utc::now());
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) {
        let hour_ago = now - Duration::hours(1);
        self.windows
            .retain(|_, window| window.back().is_some_and(|t| *t > hour_ago));
    }

    pub fn tracked_ips(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 1));
    const OTHER: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 2));

    #[test]
    fn test_sixty_first_request_in_a_minute_is_rejected() {
        let limiter = RateLimiter::new(60, 1000);
        let t0 = Utc::now();

        for i in 0..60 {
            limiter
                .check_at(IP, t0 + Duration::milliseconds(i * 10))
                .unwrap();
        }

        let err = limiter
            .check_at(IP, t0 + Duration::milliseconds(600))
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExceeded { .. }));
    }

    #[test]
    fn test_minute_window_slides_open_again() {
        let limiter = RateLimiter::new(60, 1000);
        let t0 = Utc::now();

        for i in 0..60 {
            limiter
                .check_at(IP, t0 + Duration::milliseconds(i * 10))
                .unwrap();
        }
        assert!(limiter.check_at(IP, t0 + Duration::seconds(1)).is_err());

        // 61 seconds after the burst the whole minute window has slid past
        assert!(limiter.check_at(IP, t0 + Duration::seconds(61)).is_ok());
    }

    #[test]
    fn test_hourly_ceiling_holds_across_slid_minutes() {
        let limiter = RateLimiter::new(60, 100);
        let t0 = Utc::now();

        // 100 requests spread so no single minute exceeds its limit
        for i in 0..100i64 {
            limiter.check_at(IP, t0 + Duration::seconds(i * 30)).unwrap();
        }

        let err = limiter
            .check_at(IP, t0 + Duration::seconds(100 * 30))
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExceeded { .. }));
    }

    #[test]
    fn test_addresses_are_isolated() {
        let limiter = RateLimiter::new(60, 1000);
        let t0 = Utc::now();

        for i in 0..60 {
            limiter
                .check_at(IP, t0 + Duration::milliseconds(i * 10))
                .unwrap();
        }
        assert!(limiter.check_at(IP, t0 + Duration::seconds(1)).is_err());
        assert!(limiter.check_at(OTHER, t0 + Duration::seconds(1)).is_ok());
    }

    #[test]
    fn test_rejected_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::new(5, 1000);
        let t0 = Utc::now();

        for i in 0..5 {
            limiter.check_at(IP, t0 + Duration::seconds(i)).unwrap();
        }
        // Hammering while limited records nothing
        for i in 5..30 {
            assert!(limiter.check_at(IP, t0 + Duration::seconds(i)).is_err());
        }
        // First admitted timestamp ages out at t0 + 60s
        assert!(limiter.check_at(IP, t0 + Duration::seconds(61)).is_ok());
    }

    #[test]
    fn test_sweep_drops_idle_addresses() {
        let limiter = RateLimiter::new(60, 1000);
        let t0 = Utc::now();

        limiter.check_at(IP, t0).unwrap();
        limiter.check_at(OTHER, t0 + Duration::minutes(59)).unwrap();
        assert_eq!(limiter.tracked_ips(), 2);

        limiter.sweep_at(t0 + Duration::minutes(61));
        assert_eq!(limiter.tracked_ips(), 1);
    }
}
