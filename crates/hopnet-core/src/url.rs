//! Payment URL format: `hopnet://<address>/<payee-id>`.

use crate::error::CoreError;
use crate::types::{NetAddress, PayeeId};

const SCHEME: &str = "hopnet://";

/// Renders the URL a payer needs to reach one payee.
pub fn format_pay_url(address: &NetAddress, payee: &PayeeId) -> String {
    format!("{SCHEME}{address}/{payee}")
}

/// Splits a payment URL into transport address and payee identifier.
pub fn parse_pay_url(url: &str) -> Result<(NetAddress, PayeeId), CoreError> {
    let rest = url
        .strip_prefix(SCHEME)
        .ok_or_else(|| CoreError::InvalidUrl(url.to_owned()))?;
    let (address, payee) = rest
        .split_once('/')
        .ok_or_else(|| CoreError::InvalidUrl(url.to_owned()))?;
    if address.is_empty() {
        return Err(CoreError::InvalidUrl(url.to_owned()));
    }
    let payee = PayeeId::new(payee).map_err(|_| CoreError::InvalidUrl(url.to_owned()))?;
    Ok((NetAddress::new(address), payee))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_round_trip() {
        let address = NetAddress::new("node7.example:4200");
        let payee = PayeeId::generate();
        let url = format_pay_url(&address, &payee);
        let (parsed_address, parsed_payee) = parse_pay_url(&url).unwrap();
        assert_eq!(parsed_address, address);
        assert_eq!(parsed_payee, payee);
    }

    #[test]
    fn test_bad_urls_rejected() {
        assert!(parse_pay_url("http://host/payee").is_err());
        assert!(parse_pay_url("hopnet://hostonly").is_err());
        assert!(parse_pay_url("hopnet:///payee").is_err());
        assert!(parse_pay_url("hopnet://host/").is_err());
    }
}
