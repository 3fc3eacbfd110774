//! SOAP codec for the legacy `ExecuteDataSourcePost` call.
//!
//! The request side is a fixed envelope with four escaped text parameters.
//! The reply side decodes the `ExecuteDataSourcePostResult` document into
//! [`LegacyReply`], leaving error mapping and row flattening to the caller.

use dsq_types::DataSourceError;
use quick_xml::escape::escape;
use serde::Deserialize;

pub const SERVICE_NAMESPACE: &str = "http://www.plexus-online.com/DataSource";
pub const SOAP_ACTION: &str = "http://www.plexus-online.com/DataSource/ExecuteDataSourcePost";
pub const CONTENT_TYPE: &str = "text/xml; charset=utf-8";
/// Present in every fault document regardless of namespace prefix.
pub const FAULT_MARKER: &str = "Fault>";

/// Parameters of one legacy call, already encoded as parallel strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCall {
    pub data_source_key: i64,
    pub parameter_names: String,
    pub parameter_values: String,
    pub delimiter: String,
}

/// Renders the SOAP 1.1 envelope for `call`.
///
/// The service spells its delimiter parameter `delimeter`; the element name
/// must match the service contract exactly.
pub fn build_envelope(call: &LegacyCall) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<soap:Body>",
            r#"<ExecuteDataSourcePost xmlns="{namespace}">"#,
            "<dataSourceKey>{key}</dataSourceKey>",
            "<parameterNames>{names}</parameterNames>",
            "<parameterValues>{values}</parameterValues>",
            "<delimeter>{delimiter}</delimeter>",
            "</ExecuteDataSourcePost>",
            "</soap:Body>",
            "</soap:Envelope>"
        ),
        namespace = SERVICE_NAMESPACE,
        key = call.data_source_key,
        names = escape(call.parameter_names.as_str()),
        values = escape(call.parameter_values.as_str()),
        delimiter = escape(call.delimiter.as_str()),
    )
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Body", alias = "soap:Body")]
    body: Body,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(rename = "ExecuteDataSourcePostResponse", default)]
    response: Option<PostResponse>,
    #[serde(rename = "Fault", alias = "soap:Fault", default)]
    fault: Option<Fault>,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    #[serde(rename = "ExecuteDataSourcePostResult")]
    result: LegacyReply,
}

#[derive(Debug, Deserialize)]
struct Fault {
    #[serde(rename = "faultcode", default)]
    code: Option<String>,
    #[serde(rename = "faultstring", default)]
    message: Option<String>,
}

/// Structured reply of `ExecuteDataSourcePost`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyReply {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data_source_key: Option<String>,
    #[serde(default)]
    pub instance_no: Option<String>,
    #[serde(default)]
    pub status_no: Option<String>,
    #[serde(default)]
    pub error_no: Option<String>,
    #[serde(default)]
    pub result_sets: Option<ResultSets>,
}

impl LegacyReply {
    /// The first result set, which is the only one the service populates.
    pub fn first_result_set(&self) -> Option<&ResultSet> {
        self.result_sets.as_ref().and_then(|sets| sets.result_set.first())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultSets {
    #[serde(rename = "ResultSet", default)]
    pub result_set: Vec<ResultSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultSet {
    #[serde(rename = "RowCount", default)]
    pub row_count: Option<String>,
    #[serde(rename = "Rows", default)]
    pub rows: Option<RowsNode>,
}

impl ResultSet {
    pub fn row_count(&self) -> Option<u64> {
        self.row_count.as_deref().and_then(|raw| raw.trim().parse().ok())
    }

    pub fn rows(&self) -> &[RowNode] {
        self.rows.as_ref().map(|rows| rows.row.as_slice()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RowsNode {
    #[serde(rename = "Row", default)]
    pub row: Vec<RowNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RowNode {
    #[serde(rename = "Columns", default)]
    pub columns: Option<ColumnsNode>,
}

impl RowNode {
    pub fn columns(&self) -> &[ColumnNode] {
        self.columns
            .as_ref()
            .map(|columns| columns.column.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ColumnsNode {
    #[serde(rename = "Column", default)]
    pub column: Vec<ColumnNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ColumnNode {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<String>,
}

/// Decodes a SOAP reply document. `data_source_key` only labels errors.
pub fn decode_reply(data_source_key: &str, xml: &str) -> Result<LegacyReply, DataSourceError> {
    let envelope: Envelope = quick_xml::de::from_str(xml).map_err(|error| {
        DataSourceError::response_shape(data_source_key, format!("invalid SOAP reply: {error}"))
    })?;

    if let Some(fault) = envelope.body.fault {
        return Err(DataSourceError::response_shape(
            data_source_key,
            format!(
                "SOAP fault {}: {}",
                fault.code.unwrap_or_default(),
                fault.message.unwrap_or_default()
            ),
        ));
    }

    envelope
        .body
        .response
        .map(|response| response.result)
        .ok_or_else(|| DataSourceError::response_shape(data_source_key, "missing ExecuteDataSourcePostResult"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS_REPLY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">
  <soap:Body>
    <ExecuteDataSourcePostResponse xmlns="http://www.plexus-online.com/DataSource">
      <ExecuteDataSourcePostResult>
        <Error>false</Error>
        <ErrorNo>0</ErrorNo>
        <Message>Success</Message>
        <DataSourceKey>1234</DataSourceKey>
        <InstanceNo>42</InstanceNo>
        <StatusNo>1</StatusNo>
        <ResultSets>
          <ResultSet>
            <RowCount>2</RowCount>
            <Rows>
              <Row>
                <Columns>
                  <Column><Name>Part_No</Name><Value>A-1</Value></Column>
                  <Column><Name>Quantity</Name><Value>5</Value></Column>
                </Columns>
              </Row>
              <Row>
                <Columns>
                  <Column><Name>Part_No</Name><Value>B-2</Value></Column>
                  <Column><Name>Quantity</Name><Value>7</Value></Column>
                </Columns>
              </Row>
            </Rows>
          </ResultSet>
        </ResultSets>
      </ExecuteDataSourcePostResult>
    </ExecuteDataSourcePostResponse>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn envelope_escapes_parameters_and_keeps_wire_spelling() {
        let envelope = build_envelope(&LegacyCall {
            data_source_key: 1234,
            parameter_names: "A|B".into(),
            parameter_values: "x<y|a&b".into(),
            delimiter: "|".into(),
        });
        assert!(envelope.contains("<dataSourceKey>1234</dataSourceKey>"));
        assert!(envelope.contains("<parameterValues>x&lt;y|a&amp;b</parameterValues>"));
        assert!(envelope.contains("<delimeter>|</delimeter>"));
        assert!(envelope.contains(SERVICE_NAMESPACE));
    }

    #[test]
    fn decodes_rows_and_metadata() {
        let reply = decode_reply("1234", SUCCESS_REPLY).unwrap();
        assert!(!reply.error);
        assert_eq!(reply.instance_no.as_deref(), Some("42"));
        let result_set = reply.first_result_set().unwrap();
        assert_eq!(result_set.row_count(), Some(2));
        assert_eq!(result_set.rows().len(), 2);
        let first = result_set.rows()[0].columns();
        assert_eq!(first[0].name, "Part_No");
        assert_eq!(first[0].value.as_deref(), Some("A-1"));
    }

    #[test]
    fn decodes_error_flag_without_result_sets() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body>
<ExecuteDataSourcePostResponse xmlns="http://www.plexus-online.com/DataSource"><ExecuteDataSourcePostResult>
<Error>true</Error><ErrorNo>7</ErrorNo><Message>Invalid parameter</Message>
<DataSourceKey>1234</DataSourceKey><InstanceNo>9</InstanceNo><StatusNo>3</StatusNo>
</ExecuteDataSourcePostResult></ExecuteDataSourcePostResponse></soap:Body></soap:Envelope>"#;
        let reply = decode_reply("1234", xml).unwrap();
        assert!(reply.error);
        assert_eq!(reply.error_no.as_deref(), Some("7"));
        assert_eq!(reply.message.as_deref(), Some("Invalid parameter"));
        assert!(reply.first_result_set().is_none());
    }

    #[test]
    fn non_xml_is_a_shape_error() {
        let error = decode_reply("1234", "<html><body>gateway</body></html>").unwrap_err();
        assert!(matches!(error, DataSourceError::ResponseShape { .. }));
    }
}
