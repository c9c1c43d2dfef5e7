use crate::market_data::normaliser::WireNumber;

// Source: GET https://www.nseindia.com/api/allIndices
#[derive(Debug, serde::Deserialize)]
pub struct AllIndices {
    pub data: Vec<IndexQuote>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuote {
    pub index: String,
    pub last: Option<WireNumber>,
    pub open: Option<WireNumber>,
    pub high: Option<WireNumber>,
    pub low: Option<WireNumber>,
    pub previous_close: Option<WireNumber>,
    // not every feed carries volume for indices
    pub volume: Option<WireNumber>,
}
