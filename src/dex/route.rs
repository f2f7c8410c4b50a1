use serde::{Deserialize, Serialize};

use super::pair::Pair;
use super::price::Price;
use super::token::Token;
use crate::errors::{AppError, Result};

/// Ordered chain of pools leading from `input` to `output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub pairs: Vec<Pair>,
    pub path: Vec<Token>,
    pub input: Token,
    pub output: Token,
    pub mid_price: Price,
}

impl Route {
    /// Validate the chain and derive its path and mid price.
    ///
    /// `output` defaults to the last token reached, which allows routes that
    /// end on the input token.
    pub fn new(pairs: Vec<Pair>, input: Token, output: Option<Token>) -> Result<Self> {
        let Some(first) = pairs.first() else {
            return Err(AppError::InvalidPairs("route has no pairs".into()));
        };
        if !first.involves_token(&input) {
            return Err(AppError::InvalidCurrency(format!(
                "first pair does not hold input {input}"
            )));
        }

        let mut path = Vec::with_capacity(pairs.len() + 1);
        path.push(input.clone());
        for (i, pair) in pairs.iter().enumerate() {
            let current = &path[i];
            if !pair.involves_token(current) {
                return Err(AppError::InvalidPairs(format!(
                    "pair {i} ({:?}) does not hold {current}",
                    pair.address()
                )));
            }
            let next = pair.other_token(current)?.clone();
            path.push(next);
        }

        let reached = path[path.len() - 1].clone();
        let output = match output {
            Some(output) if output != reached => {
                return Err(AppError::InvalidCurrency(format!(
                    "route ends at {reached}, expected {output}"
                )));
            }
            Some(output) => output,
            None => reached,
        };

        let mid_price = Self::compute_mid_price(&pairs, &path)?;
        Ok(Self {
            pairs,
            path,
            input,
            output,
            mid_price,
        })
    }

    fn compute_mid_price(pairs: &[Pair], path: &[Token]) -> Result<Price> {
        let mut prices = pairs
            .iter()
            .zip(path)
            .map(|(pair, token_in)| pair.price_of(token_in));
        let first = prices
            .next()
            .ok_or_else(|| AppError::InvalidPairs("route has no pairs".into()))??;
        prices.try_fold(first, |acc, price| acc.multiply(&price?))
    }

    pub fn hops(&self) -> usize {
        self.pairs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::token::TokenAmount;
    use crate::math::Fraction;
    use ethers::types::Address;

    fn token(n: u64) -> Token {
        Token::new(Address::from_low_u64_be(n + 1), 18, format!("T{n}"), format!("Token {n}"))
    }

    fn pair(a: u64, b: u64, ra: u64, rb: u64) -> Pair {
        Pair::new(
            Address::from_low_u64_be(1000 + a * 10 + b),
            TokenAmount::new(token(a), ra),
            TokenAmount::new(token(b), rb),
        )
        .unwrap()
    }

    #[test]
    fn single_hop_route() {
        let route = Route::new(vec![pair(0, 1, 100, 200)], token(0), Some(token(1))).unwrap();
        assert_eq!(route.path, vec![token(0), token(1)]);
        assert_eq!(route.mid_price.base, token(0));
        assert_eq!(route.mid_price.quote, token(1));
        assert_eq!(route.mid_price.raw(), &Fraction::new(200, 100));
        assert_eq!(route.mid_price.invert().raw(), &Fraction::new(100, 200));
    }

    #[test]
    fn multi_hop_path_and_mid_price() {
        let route = Route::new(
            vec![pair(0, 1, 100, 200), pair(1, 2, 300, 150)],
            token(0),
            None,
        )
        .unwrap();
        assert_eq!(route.path.len(), route.pairs.len() + 1);
        assert_eq!(route.output, token(2));
        // 2 * 0.5
        assert_eq!(route.mid_price.raw(), &Fraction::one());
        for (i, pair) in route.pairs.iter().enumerate() {
            assert!(pair.involves_token(&route.path[i]));
            assert!(pair.involves_token(&route.path[i + 1]));
        }
    }

    #[test]
    fn round_trip_route_defaults_output_to_input() {
        let route = Route::new(
            vec![pair(0, 1, 100, 200), pair(0, 1, 100, 400)],
            token(0),
            None,
        )
        .unwrap();
        assert_eq!(route.output, token(0));
        assert_eq!(route.path, vec![token(0), token(1), token(0)]);
    }

    #[test]
    fn broken_chains_are_rejected() {
        assert!(matches!(
            Route::new(vec![], token(0), None),
            Err(AppError::InvalidPairs(_))
        ));
        assert!(matches!(
            Route::new(vec![pair(1, 2, 1, 1)], token(0), None),
            Err(AppError::InvalidCurrency(_))
        ));
        assert!(matches!(
            Route::new(vec![pair(0, 1, 1, 1), pair(2, 3, 1, 1)], token(0), None),
            Err(AppError::InvalidPairs(_))
        ));
        assert!(matches!(
            Route::new(vec![pair(0, 1, 1, 1)], token(0), Some(token(2))),
            Err(AppError::InvalidCurrency(_))
        ));
    }
}
