//! Payment gateway glue: checkout hashes going out, signed status callbacks
//! coming in. The gateway signs with
//! `UPPER(MD5(merchant_id + order_id + amount + currency + status_code + UPPER(MD5(secret))))`.

use md5::{Digest, Md5};

use crate::model::{Money, PaymentStatus, ReservationStatus};

fn md5_upper(input: &str) -> String {
    hex::encode_upper(Md5::digest(input.as_bytes()))
}

/// Inbound status callback, fields exactly as the gateway posted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub merchant_id: String,
    pub order_id: String,
    pub amount: String,
    pub currency: String,
    pub status_code: String,
    pub signature: String,
    /// Gateway-side payment id, kept as the payment reference.
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success,
    Pending,
    Failed,
}

impl GatewayOutcome {
    /// `2` success, `0` pending, anything else (including garbage) failure.
    pub fn from_status_code(code: &str) -> Self {
        match code.trim().parse::<i32>() {
            Ok(2) => GatewayOutcome::Success,
            Ok(0) => GatewayOutcome::Pending,
            _ => GatewayOutcome::Failed,
        }
    }

    /// Statuses this outcome drives a reservation to; `None` leaves it alone.
    pub fn target(self) -> Option<(PaymentStatus, ReservationStatus)> {
        match self {
            GatewayOutcome::Success => Some((PaymentStatus::Paid, ReservationStatus::Confirmed)),
            GatewayOutcome::Pending => None,
            GatewayOutcome::Failed => Some((PaymentStatus::Failed, ReservationStatus::Cancelled)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    UnknownMerchant(String),
    Mismatch,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::UnknownMerchant(m) => write!(f, "unknown merchant id: {m}"),
            SignatureError::Mismatch => write!(f, "signature mismatch"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Parameters a guest-facing checkout form posts to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub merchant_id: String,
    pub order_id: String,
    pub amount: String,
    pub currency: String,
    pub hash: String,
}

/// Merchant credentials. The secret is kept only in hashed form.
#[derive(Clone)]
pub struct PaymentGateway {
    merchant_id: String,
    hashed_secret: String,
    currency: String,
}

impl std::fmt::Debug for PaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGateway")
            .field("merchant_id", &self.merchant_id)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

impl PaymentGateway {
    pub fn new(merchant_id: impl Into<String>, merchant_secret: &str, currency: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            hashed_secret: md5_upper(merchant_secret),
            currency: currency.into(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Signature the gateway must have attached to `n`.
    pub fn expected_signature(&self, n: &PaymentNotification) -> String {
        md5_upper(&format!(
            "{}{}{}{}{}{}",
            n.merchant_id, n.order_id, n.amount, n.currency, n.status_code, self.hashed_secret
        ))
    }

    /// Must pass before any state is touched.
    pub fn verify(&self, n: &PaymentNotification) -> Result<(), SignatureError> {
        if n.merchant_id != self.merchant_id {
            return Err(SignatureError::UnknownMerchant(n.merchant_id.clone()));
        }
        if self
            .expected_signature(n)
            .eq_ignore_ascii_case(n.signature.trim())
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    pub fn checkout(&self, order_id: &str, amount: Money) -> Checkout {
        let amount = amount.to_string();
        let hash = md5_upper(&format!(
            "{}{}{}{}{}",
            self.merchant_id, order_id, amount, self.currency, self.hashed_secret
        ));
        Checkout {
            merchant_id: self.merchant_id.clone(),
            order_id: order_id.to_string(),
            amount,
            currency: self.currency.clone(),
            hash,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn gateway() -> PaymentGateway {
        PaymentGateway::new("1211149", "s3cret", "LKR")
    }

    /// A notification signed the way the gateway would sign it.
    pub(crate) fn signed(gw: &PaymentGateway, order_id: &str, amount: &str, status_code: &str) -> PaymentNotification {
        let mut n = PaymentNotification {
            merchant_id: "1211149".into(),
            order_id: order_id.into(),
            amount: amount.into(),
            currency: "LKR".into(),
            status_code: status_code.into(),
            signature: String::new(),
            payment_id: Some("320025071278".into()),
        };
        n.signature = gw.expected_signature(&n);
        n
    }

    #[test]
    fn md5_known_vector() {
        assert_eq!(md5_upper(""), "D41D8CD98F00B204E9800998ECF8427E");
        assert_eq!(md5_upper("abc"), "900150983CD24FB0D6963F7D28E17F72");
    }

    #[test]
    fn signature_follows_documented_concatenation() {
        let gw = gateway();
        let n = signed(&gw, "ORDER1", "10000.00", "2");
        let manual = md5_upper(&format!("1211149ORDER110000.00LKR2{}", md5_upper("s3cret")));
        assert_eq!(n.signature, manual);
        assert!(gw.verify(&n).is_ok());
    }

    #[test]
    fn lowercase_signature_accepted() {
        let gw = gateway();
        let mut n = signed(&gw, "ORDER1", "10000.00", "2");
        n.signature = n.signature.to_lowercase();
        assert!(gw.verify(&n).is_ok());
    }

    #[test]
    fn tampered_status_code_rejected() {
        let gw = gateway();
        let mut n = signed(&gw, "ORDER1", "10000.00", "-2");
        n.status_code = "2".into();
        assert_eq!(gw.verify(&n), Err(SignatureError::Mismatch));
    }

    #[test]
    fn tampered_amount_rejected() {
        let gw = gateway();
        let mut n = signed(&gw, "ORDER1", "10000.00", "2");
        n.amount = "1.00".into();
        assert_eq!(gw.verify(&n), Err(SignatureError::Mismatch));
    }

    #[test]
    fn foreign_merchant_rejected() {
        let gw = gateway();
        let other = PaymentGateway::new("999", "s3cret", "LKR");
        let mut n = signed(&other, "ORDER1", "10000.00", "2");
        n.merchant_id = "999".into();
        assert!(matches!(gw.verify(&n), Err(SignatureError::UnknownMerchant(_))));
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(GatewayOutcome::from_status_code("2"), GatewayOutcome::Success);
        assert_eq!(GatewayOutcome::from_status_code(" 0 "), GatewayOutcome::Pending);
        assert_eq!(GatewayOutcome::from_status_code("-1"), GatewayOutcome::Failed);
        assert_eq!(GatewayOutcome::from_status_code("-3"), GatewayOutcome::Failed);
        assert_eq!(GatewayOutcome::from_status_code("ok"), GatewayOutcome::Failed);
        assert_eq!(GatewayOutcome::Pending.target(), None);
        assert_eq!(
            GatewayOutcome::Failed.target(),
            Some((PaymentStatus::Failed, ReservationStatus::Cancelled))
        );
    }

    #[test]
    fn checkout_hash() {
        let gw = gateway();
        let c = gw.checkout("ORDER1", Money::from_major(10000));
        assert_eq!(c.amount, "10000.00");
        assert_eq!(c.currency, "LKR");
        let manual = md5_upper(&format!("1211149ORDER110000.00LKR{}", md5_upper("s3cret")));
        assert_eq!(c.hash, manual);
    }

    #[test]
    fn debug_hides_secret() {
        let printed = format!("{:?}", gateway());
        assert!(!printed.contains(&md5_upper("s3cret")));
    }
}
