//! Statement categories and the role URI tables that assign them.

use crate::dts::Role;
use crate::{Error, Result};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatementCategory {
    Income,
    FinancialPosition,
    CashFlow,
    Other,
}

impl StatementCategory {
    /// Match order when a role could fit more than one table.
    pub const ALL: [StatementCategory; 4] = [
        StatementCategory::Income,
        StatementCategory::FinancialPosition,
        StatementCategory::CashFlow,
        StatementCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatementCategory::Income => "income",
            StatementCategory::FinancialPosition => "financial-position",
            StatementCategory::CashFlow => "cash-flow",
            StatementCategory::Other => "other",
        }
    }
}

impl fmt::Display for StatementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StatementCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s.trim())
            .ok_or_else(|| Error::Parse(format!("unknown statement category {:?}", s)))
    }
}

const FASB_ROLE: &str = "http://fasb.org/us-gaap/role/statement/";

const INCOME_ROLES: &[&str] = &[
    "StatementOfIncome",
    "StatementOfIncomeAlternative",
    "StatementOfIncomeInterestBasedRevenue",
    "StatementOfIncomeInsuranceBasedRevenue",
    "StatementOfIncomeSecuritiesBasedRevenue",
    "StatementOfIncomeRealEstate",
    "StatementOfIncomeRealEstateInvestmentTrusts",
];

const FINANCIAL_POSITION_ROLES: &[&str] = &[
    "StatementOfFinancialPositionClassified",
    "StatementOfFinancialPositionUnclassified",
    "StatementOfFinancialPositionUnclassifiedDepositBasedOperations",
    "StatementOfFinancialPositionUnclassifiedInsuranceBasedOperations",
    "StatementOfFinancialPositionUnclassifiedSecuritiesBasedOperations",
    "StatementOfFinancialPositionClassifiedRealEstate",
    "StatementOfFinancialPositionUnclassifiedRealEstate",
];

const CASH_FLOW_ROLES: &[&str] = &[
    "StatementOfCashFlowsIndirect",
    "StatementOfCashFlowsDirect",
    "StatementOfCashFlowsIndirectDepositBasedOperations",
    "StatementOfCashFlowsIndirectInsuranceBasedOperations",
    "StatementOfCashFlowsIndirectSecuritiesBasedOperations",
    "StatementOfCashFlowsIndirectRealEstate",
    "StatementOfCashFlowsDirectRealEstate",
];

const OTHER_ROLES: &[&str] = &[
    "StatementOfOtherComprehensiveIncome",
    "StatementOfComprehensiveIncomeAlternative",
    "StatementOfShareholdersEquityAndOtherComprehensiveIncome",
    "StatementOfPartnersCapital",
    "StatementOfStockholdersEquity",
];

/// Read-only lookup tables mapping role URIs to statement categories.
#[derive(Debug, Clone)]
pub struct RoleClassifier {
    tables: [Vec<CompactString>; 4],
}

impl Default for RoleClassifier {
    fn default() -> Self {
        Self::us_gaap()
    }
}

impl RoleClassifier {
    pub fn new<I, S>(income: I, financial_position: I, cash_flow: I, other: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table = |uris: I| {
            uris.into_iter()
                .map(|uri| CompactString::from(uri.as_ref()))
                .collect::<Vec<_>>()
        };
        Self {
            tables: [
                table(income),
                table(financial_position),
                table(cash_flow),
                table(other),
            ],
        }
    }

    /// Statement roles of the FASB US-GAAP taxonomy.
    pub fn us_gaap() -> Self {
        let uris = |names: &[&str]| -> Vec<String> {
            names.iter().map(|name| format!("{}{}", FASB_ROLE, name)).collect()
        };
        Self::new(
            uris(INCOME_ROLES),
            uris(FINANCIAL_POSITION_ROLES),
            uris(CASH_FLOW_ROLES),
            uris(OTHER_ROLES),
        )
    }

    /// First table containing the URI exactly, in category order.
    pub fn category(&self, uri: &str) -> Option<StatementCategory> {
        StatementCategory::ALL
            .into_iter()
            .zip(&self.tables)
            .find(|(_, table)| table.iter().any(|known| known.as_str() == uri))
            .map(|(category, _)| category)
    }

    /// Statement roles with a presentation network; disclosures never qualify.
    pub fn is_eligible(role: &Role) -> bool {
        role.uri.contains("statement")
            && !role.uri.contains("disclosure")
            && role.presentation().is_some()
    }

    /// Matches the role's definition string, then its URI.
    pub fn classify(&self, role: &Role) -> Option<StatementCategory> {
        if !Self::is_eligible(role) {
            return None;
        }
        self.category(&role.definition)
            .or_else(|| self.category(&role.uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkKind;

    fn role(uri: &str) -> Role {
        let mut role = Role::new(uri);
        role.network_mut(LinkKind::Presentation);
        role
    }

    #[test]
    fn test_us_gaap_categories() {
        let classifier = RoleClassifier::us_gaap();
        let cases = [
            ("StatementOfIncome", StatementCategory::Income),
            ("StatementOfFinancialPositionClassified", StatementCategory::FinancialPosition),
            ("StatementOfCashFlowsIndirect", StatementCategory::CashFlow),
            ("StatementOfPartnersCapital", StatementCategory::Other),
        ];
        for (name, expected) in cases {
            let uri = format!("{}{}", FASB_ROLE, name);
            assert_eq!(classifier.classify(&role(&uri)), Some(expected), "{}", name);
        }
    }

    #[test]
    fn test_category_names() {
        for category in StatementCategory::ALL {
            assert_eq!(category.as_str().parse::<StatementCategory>().unwrap(), category);
        }
        assert!(matches!(
            "balance-sheet".parse::<StatementCategory>(),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_match_is_exact() {
        let classifier = RoleClassifier::us_gaap();
        let uri = format!("{}StatementOfIncomeX", FASB_ROLE);
        assert_eq!(classifier.classify(&role(&uri)), None);
    }

    #[test]
    fn test_first_table_wins() {
        let uri = "http://example.com/role/statement/Combined";
        let classifier = RoleClassifier::new(vec![uri], vec![uri], vec![], vec![uri]);
        assert_eq!(classifier.classify(&role(uri)), Some(StatementCategory::Income));
    }

    #[test]
    fn test_definition_is_matched_before_uri() {
        let known = format!("{}StatementOfCashFlowsIndirect", FASB_ROLE);
        let classifier = RoleClassifier::us_gaap();
        let mut custom = role("http://example.com/role/statement/CashFlows");
        assert_eq!(classifier.classify(&custom), None);
        custom.definition = CompactString::from(known.as_str());
        assert_eq!(classifier.classify(&custom), Some(StatementCategory::CashFlow));
    }

    #[test]
    fn test_eligibility() {
        let uri = "http://example.com/role/statement/disclosure/Income";
        let classifier = RoleClassifier::new(vec![uri], vec![], vec![], vec![]);
        assert_eq!(classifier.classify(&role(uri)), None);

        let bare = "http://example.com/role/statement/Income";
        let classifier = RoleClassifier::new(vec![bare], vec![], vec![], vec![]);
        assert_eq!(classifier.classify(&Role::new(bare)), None);
        assert_eq!(classifier.classify(&role(bare)), Some(StatementCategory::Income));
    }
}
