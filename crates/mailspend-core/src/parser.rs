//! Heuristic email transaction parser
//!
//! Pure, deterministic extraction of transaction candidates from bank and
//! fintech notification emails. Precision over recall: anything that does
//! not look financial, or has no detectable amount, yields nothing rather
//! than a low-quality candidate.
//!
//! The confidence score is additive and capped at 1.0; candidates that make
//! it past both gates from a known bank domain land in the 0.5-1.0 range.

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::models::{NewCandidate, RawEmail, TransactionKind};

/// Curated bank/fintech sender domains
pub const BANK_DOMAINS: &[&str] = &[
    "sbi.co.in",
    "hdfcbank.com",
    "icicibank.com",
    "axisbank.com",
    "kotak.com",
    "yesbank.in",
    "indusind.com",
    "pnb.co.in",
    "bankofbaroda.co.in",
    "canarabank.com",
    "unionbankofindia.co.in",
    "idfcfirstbank.com",
    "rbl.co.in",
    "sc.com",
    "citibank.co.in",
    "hsbc.co.in",
    "dbs.com",
    "americanexpress.com",
    "paytm.com",
    "phonepe.com",
    "gpay.com",
    "razorpay.com",
    "bharatpe.com",
    "cred.club",
];

/// Keywords that mark a sender/subject as financial even without a known domain
const FINANCIAL_KEYWORDS: &[&str] = &[
    "bank",
    "card",
    "payment",
    "transaction",
    "debit",
    "credit",
    "atm",
    "upi",
    "neft",
    "rtgs",
    "imps",
    "wallet",
    "paytm",
    "phonepe",
];

/// Kind classification keywords. Scoring sums the lengths of matched
/// keywords, so longer/more specific phrases outweigh short generic ones.
const KIND_KEYWORDS: &[(TransactionKind, &[&str])] = &[
    (
        TransactionKind::Debit,
        &["debited", "debit", "spent", "purchase", "payment", "withdrawn"],
    ),
    (
        TransactionKind::Credit,
        &["credited", "credit", "received", "deposit", "refund", "cashback"],
    ),
    (
        TransactionKind::AtmWithdrawal,
        &["atm", "cash withdrawal", "withdrew"],
    ),
    (
        TransactionKind::OnlinePurchase,
        &["online", "ecommerce", "amazon", "flipkart", "swiggy", "zomato"],
    ),
    (
        TransactionKind::MobilePayment,
        &["upi", "paytm", "phonepe", "gpay", "bhim"],
    ),
    (
        TransactionKind::BillPayment,
        &["bill payment", "electricity", "mobile recharge", "dth"],
    ),
    (TransactionKind::EmiPayment, &["emi", "loan", "installment"]),
    (TransactionKind::SalaryCredit, &["salary", "sal cr"]),
    (
        TransactionKind::InterestCredit,
        &["interest", "fd interest", "sb interest"],
    ),
    (
        TransactionKind::Charges,
        &["charges", "fee", "annual fee", "service charge"],
    ),
];

/// Ordered merchant-pattern to category table; first match wins
const CATEGORY_PATTERNS: &[(&str, &str)] = &[
    ("amazon|flipkart|myntra|ajio", "Shopping"),
    ("swiggy|zomato|dominos|mcdonald", "Food & Dining"),
    ("uber|ola|metro|bus", "Transportation"),
    ("phonepe|paytm|gpay", "Digital Wallet"),
    ("netflix|spotify|prime", "Entertainment"),
    ("electricity|gas|water|mobile", "Utilities"),
    ("hospital|medical|pharmacy", "Healthcare"),
    ("petrol|fuel|hp|bharat", "Fuel"),
    ("grocery|supermarket|dmart", "Groceries"),
];

/// Maximum description length before truncation
const MAX_DESCRIPTION_LEN: usize = 500;

/// Heuristic transaction parser with pre-compiled patterns
pub struct EmailParser {
    amount: Regex,
    card_last4: Regex,
    account_last4: Regex,
    txn_id: Regex,
    upi_ref: Regex,
    reference: Regex,
    merchant_patterns: Vec<Regex>,
    category_patterns: Vec<(Regex, &'static str)>,
    html_tag: Regex,
    whitespace: Regex,
}

impl EmailParser {
    pub fn new() -> Result<Self> {
        let merchant_patterns = vec![
            Regex::new(r"(?i)(?:at|to|from)\s+([A-Z][A-Za-z\s]+?)\s+(?:on|for|\.|$)")?,
            Regex::new(r"(?i)merchant[:\s]+([A-Za-z0-9\s]+?)(?:\s|$)")?,
            Regex::new(r"(?i)([A-Z][A-Za-z\s]+?)\s+transaction")?,
        ];

        let category_patterns = CATEGORY_PATTERNS
            .iter()
            .map(|(pattern, label)| Ok((Regex::new(&format!("(?i){}", pattern))?, *label)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            amount: Regex::new(r"(?i)(?:rs\.?|inr|₹)\s*([0-9,]+(?:\.[0-9]{2})?)")?,
            card_last4: Regex::new(r"(?i)(?:card|xxxx)\s*(?:ending\s*)?(?:with\s*)?([0-9]{4})")?,
            account_last4: Regex::new(
                r"(?i)(?:account|a/c)\s*(?:no\.?|number)?\s*(?:ending\s*)?(?:with\s*)?(?:xxxx)?([0-9]{4})",
            )?,
            txn_id: Regex::new(
                r"(?i)(?:transaction|txn|ref|reference)\s*(?:id|no\.?|number)?:?\s*([a-zA-Z0-9]+)",
            )?,
            upi_ref: Regex::new(r"(?i)upi\s*(?:id|ref)?:?\s*([0-9]+)")?,
            reference: Regex::new(r"(?i)(?:rrn|ref no|reference number):?\s*([a-zA-Z0-9]+)")?,
            merchant_patterns,
            category_patterns,
            html_tag: Regex::new(r"<[^>]*>")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Parse one email into at most one transaction candidate
    ///
    /// Returns None when the email fails the financial gate or no amount is
    /// found; neither case is an error and nothing is persisted for them.
    pub fn parse(&self, email: &RawEmail) -> Option<NewCandidate> {
        if !self.is_financial_email(&email.sender, &email.subject) {
            debug!(sender = %email.sender, "email not from financial institution, skipping");
            return None;
        }

        let content = self.clean_body(&email.body);

        let amount = match self.extract_amount(&content) {
            Some(amount) => amount,
            None => {
                debug!(message_id = %email.message_id, "no amount found in email, skipping");
                return None;
            }
        };

        let kind = self.classify_kind(&content, &email.subject);
        let merchant_name = self.extract_merchant(&content, &email.subject);
        let account_last4 = self.first_group(&self.account_last4, &content);
        let card_last4 = self.first_group(&self.card_last4, &content);
        let provider_txn_id = self.extract_txn_id(&content);
        let reference_number = self.first_group(&self.reference, &content);
        let description = self.build_description(&content, &email.subject);
        let category_suggestion = self.suggest_category(merchant_name.as_deref(), &content);

        let confidence = self.confidence_score(
            &email.sender,
            provider_txn_id.is_some(),
            account_last4.is_some() || card_last4.is_some(),
            merchant_name.is_some(),
        );

        debug!(
            message_id = %email.message_id,
            amount,
            kind = %kind,
            confidence,
            "parsed transaction candidate"
        );

        Some(NewCandidate {
            sender_email: email.sender.clone(),
            email_subject: email.subject.clone(),
            raw_body: email.body.clone(),
            amount,
            currency: "INR".to_string(),
            kind,
            merchant_name,
            account_last4,
            card_last4,
            provider_txn_id,
            reference_number,
            description,
            category_suggestion,
            // Date-like substrings in bodies are unreliable; the received
            // time is the documented transaction timestamp.
            transaction_at: email.received_at,
            confidence,
        })
    }

    /// Financial-email gate: known bank domain OR financial keyword in
    /// sender/subject
    fn is_financial_email(&self, sender: &str, subject: &str) -> bool {
        let sender = sender.to_lowercase();
        let subject = subject.to_lowercase();

        if BANK_DOMAINS.iter().any(|domain| sender.contains(domain)) {
            return true;
        }

        FINANCIAL_KEYWORDS
            .iter()
            .any(|kw| sender.contains(kw) || subject.contains(kw))
    }

    /// Strip markup and collapse whitespace
    fn clean_body(&self, body: &str) -> String {
        let text = self.html_tag.replace_all(body, " ");
        self.whitespace.replace_all(&text, " ").trim().to_string()
    }

    /// First currency-amount match; amount is mandatory for a candidate
    fn extract_amount(&self, content: &str) -> Option<f64> {
        let captures = self.amount.captures(content)?;
        let raw = captures.get(1)?.as_str().replace(',', "");
        raw.parse().ok()
    }

    /// Score each kind by summed matched-keyword length; highest wins,
    /// default Debit
    fn classify_kind(&self, content: &str, subject: &str) -> TransactionKind {
        let text = format!("{} {}", content, subject).to_lowercase();

        let mut best = TransactionKind::Debit;
        let mut best_score = 0usize;

        for (kind, keywords) in KIND_KEYWORDS {
            let score: usize = keywords
                .iter()
                .filter(|kw| text.contains(**kw))
                .map(|kw| kw.len())
                .sum();
            if score > best_score {
                best = *kind;
                best_score = score;
            }
        }

        best
    }

    /// Merchant name from "at/to/from <Name>" style patterns, length-bounded
    fn extract_merchant(&self, content: &str, subject: &str) -> Option<String> {
        let text = format!("{} {}", subject, content);

        for pattern in &self.merchant_patterns {
            if let Some(captures) = pattern.captures(&text) {
                let merchant = captures.get(1)?.as_str().trim();
                if merchant.len() > 3 && merchant.len() < 50 {
                    return Some(merchant.to_string());
                }
            }
        }

        None
    }

    /// Transaction id; falls back to a UPI-style numeric reference
    fn extract_txn_id(&self, content: &str) -> Option<String> {
        self.first_group(&self.txn_id, content)
            .or_else(|| self.first_group(&self.upi_ref, content))
    }

    fn first_group(&self, pattern: &Regex, content: &str) -> Option<String> {
        pattern
            .captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// First transaction-ish sentence from the body, else the subject;
    /// truncated to 500 characters
    fn build_description(&self, content: &str, subject: &str) -> String {
        let mut desc = subject.to_string();

        if content.len() > 100 {
            for sentence in content.split(". ") {
                let lower = sentence.to_lowercase();
                if sentence.len() > 20
                    && sentence.len() < 200
                    && (lower.contains("transaction")
                        || lower.contains("payment")
                        || lower.contains("debited")
                        || lower.contains("credited"))
                {
                    desc = sentence.trim().to_string();
                    break;
                }
            }
        }

        if desc.len() > MAX_DESCRIPTION_LEN {
            let mut end = MAX_DESCRIPTION_LEN;
            while !desc.is_char_boundary(end) {
                end -= 1;
            }
            desc.truncate(end);
            desc.push_str("...");
        }
        desc
    }

    /// Ordered first-match category lookup over merchant + body text
    fn suggest_category(&self, merchant: Option<&str>, content: &str) -> String {
        let text = format!("{} {}", merchant.unwrap_or(""), content);

        for (pattern, label) in &self.category_patterns {
            if pattern.is_match(&text) {
                return label.to_string();
            }
        }

        "Other".to_string()
    }

    /// Additive confidence, capped at 1.0. Amount and kind are always
    /// present by construction, so the floor for a parsed candidate is 0.4.
    fn confidence_score(
        &self,
        sender: &str,
        has_txn_id: bool,
        has_last4: bool,
        has_merchant: bool,
    ) -> f64 {
        let sender = sender.to_lowercase();
        let mut score = 0.3; // amount

        if BANK_DOMAINS.iter().any(|domain| sender.contains(domain)) {
            score += 0.2;
        }
        if has_txn_id {
            score += 0.15;
        }
        if has_last4 {
            score += 0.15;
        }
        if has_merchant {
            score += 0.1;
        }
        score += 0.1; // classified kind

        f64::min(1.0, score)
    }
}
