//! Closed-form Black-Scholes pricing and sensitivities
//!
//! The normal CDF uses the Abramowitz-Stegun polynomial approximation
//! (absolute error below 7.5e-8), which is plenty for risk reporting.

use std::f64::consts::PI;

use common::TimestampMs;

use crate::types::{BSInputs, Greeks, OptionType};

pub const MIN_TIME: f64 = 1.0 / (365.25 * 24.0 * 3600.0);
pub const MIN_VOL: f64 = 0.01;
pub const MAX_VOL: f64 = 5.0;
pub const MIN_PRICE: f64 = 1e-6;

const MS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0 * 1000.0;

pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

pub fn norm_cdf(x: f64) -> f64 {
    const A1: f64 = 0.319381530;
    const A2: f64 = -0.356563782;
    const A3: f64 = 1.781477937;
    const A4: f64 = -1.821255978;
    const A5: f64 = 1.330274429;

    let k = 1.0 / (1.0 + 0.2316419 * x.abs());
    let poly = k * (A1 + k * (A2 + k * (A3 + k * (A4 + k * A5))));
    let upper = 1.0 - norm_pdf(x) * poly;

    if x >= 0.0 {
        upper
    } else {
        1.0 - upper
    }
}

/// Year fraction between `now` and `expiration`, never negative
pub fn years_to_expiry(expiration: TimestampMs, now: TimestampMs) -> f64 {
    ((expiration - now) as f64 / MS_PER_YEAR).max(0.0)
}

pub fn d1_d2(input: &BSInputs) -> (f64, f64) {
    let sigma_sqrt_t = input.vol * input.time.sqrt();
    let d1 = ((input.spot / input.strike).ln()
        + (input.rate + 0.5 * input.vol * input.vol) * input.time)
        / sigma_sqrt_t;
    (d1, d1 - sigma_sqrt_t)
}

/// Theoretical option value per unit of underlying
pub fn black_scholes_price(mut input: BSInputs) -> f64 {
    input.validate();

    let (d1, d2) = d1_d2(&input);
    let discount = (-input.rate * input.time).exp();

    let price = match input.option_type {
        OptionType::Call => input.spot * norm_cdf(d1) - input.strike * discount * norm_cdf(d2),
        OptionType::Put => input.strike * discount * norm_cdf(-d2) - input.spot * norm_cdf(-d1),
    };

    price.max(0.0)
}

pub fn intrinsic_value(spot: f64, strike: f64, option_type: OptionType) -> f64 {
    match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

/// Per-unit Greeks
///
/// Theta is per year and vega per 1.00 change in volatility; callers that
/// want per-day or per-vol-point figures divide themselves.
pub fn black_scholes_greeks(mut input: BSInputs) -> Greeks {
    input.validate();

    let (d1, d2) = d1_d2(&input);
    let BSInputs {
        spot: s,
        strike: k,
        time: t,
        vol: v,
        rate: r,
        option_type,
    } = input;

    let pdf = norm_pdf(d1);
    let sqrt_t = t.sqrt();
    let discounted_strike = k * (-r * t).exp();
    let decay = -(s * pdf * v) / (2.0 * sqrt_t);

    let (delta, theta, rho) = match option_type {
        OptionType::Call => (
            norm_cdf(d1),
            decay - r * discounted_strike * norm_cdf(d2),
            t * discounted_strike * norm_cdf(d2),
        ),
        OptionType::Put => (
            norm_cdf(d1) - 1.0,
            decay + r * discounted_strike * norm_cdf(-d2),
            -t * discounted_strike * norm_cdf(-d2),
        ),
    };

    Greeks {
        delta,
        gamma: pdf / (s * v * sqrt_t),
        vega: s * pdf * sqrt_t,
        theta,
        rho,
    }
}

/// Newton-Raphson implied volatility, `None` if it does not converge
pub fn implied_volatility(market_price: f64, mut input: BSInputs) -> Option<f64> {
    if !market_price.is_finite() || market_price <= 0.0 {
        return None;
    }

    let mut vol = 0.3;
    for _ in 0..100 {
        input.vol = vol;

        let diff = black_scholes_price(input) - market_price;
        if diff.abs() < 1e-6 {
            return Some(vol);
        }

        let vega = black_scholes_greeks(input).vega;
        if vega.abs() < 1e-8 {
            break;
        }

        vol = (vol - diff / vega).clamp(MIN_VOL, MAX_VOL);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atm_call() -> BSInputs {
        BSInputs {
            spot: 150.0,
            strike: 150.0,
            time: 30.0 / 365.25,
            vol: 0.3,
            rate: 0.05,
            option_type: OptionType::Call,
        }
    }

    #[test]
    fn test_norm_cdf_reference_points() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((norm_cdf(0.7) + norm_cdf(-0.7) - 1.0).abs() < 1e-10);
        assert!((norm_cdf(10.0) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_call_price_itm() {
        let input = BSInputs {
            spot: 180.0,
            ..atm_call()
        };
        assert!(black_scholes_price(input) >= 30.0);
    }

    #[test]
    fn test_put_call_parity() {
        let call = black_scholes_price(atm_call());
        let put = black_scholes_price(BSInputs {
            option_type: OptionType::Put,
            ..atm_call()
        });
        let input = atm_call();
        let rhs = input.spot - input.strike * (-input.rate * input.time).exp();
        assert!((call - put - rhs).abs() < 1e-3);
    }

    #[test]
    fn test_atm_greeks_signs() {
        let call = black_scholes_greeks(atm_call());
        assert!(call.delta > 0.45 && call.delta < 0.6);
        assert!(call.gamma > 0.0);
        assert!(call.vega > 0.0);
        assert!(call.theta < 0.0);
        assert!(call.rho > 0.0);

        let put = black_scholes_greeks(BSInputs {
            option_type: OptionType::Put,
            ..atm_call()
        });
        assert!(put.delta < 0.0);
        assert!(put.rho < 0.0);
        assert!((call.delta - put.delta - 1.0).abs() < 1e-9);
        assert!((call.gamma - put.gamma).abs() < 1e-12);
    }

    #[test]
    fn test_near_expiry_converges_to_intrinsic() {
        let input = BSInputs {
            spot: 160.0,
            time: 1e-6,
            ..atm_call()
        };
        let intrinsic = intrinsic_value(160.0, 150.0, OptionType::Call);
        assert!((black_scholes_price(input) - intrinsic).abs() < 0.01);
    }

    #[test]
    fn test_intrinsic_value() {
        assert_eq!(intrinsic_value(160.0, 150.0, OptionType::Call), 10.0);
        assert_eq!(intrinsic_value(140.0, 150.0, OptionType::Put), 10.0);
        assert_eq!(intrinsic_value(140.0, 150.0, OptionType::Call), 0.0);
        assert_eq!(intrinsic_value(160.0, 150.0, OptionType::Put), 0.0);
    }

    #[test]
    fn test_implied_vol_roundtrip() {
        let price = black_scholes_price(atm_call());
        let recovered = implied_volatility(price, atm_call()).unwrap();
        assert!((recovered - 0.3).abs() < 1e-3);
        assert_eq!(implied_volatility(0.0, atm_call()), None);
    }

    #[test]
    fn test_years_to_expiry() {
        let one_year = (365.25 * 24.0 * 3600.0 * 1000.0) as i64;
        assert!((years_to_expiry(one_year, 0) - 1.0).abs() < 1e-9);
        assert_eq!(years_to_expiry(0, one_year), 0.0);
    }
}
