//! The error-kind taxonomy from spec §7: named constants carried on `Message::Error`
//! and `BrowseResponse`/`GeneralResponse` result codes, independent of the underlying
//! wire-protocol `StatusCode` the errors may wrap.

use std::fmt;

/// A result/error code reported asynchronously through the receive queue, or
/// returned synchronously from a façade call that doesn't need to emit a `Message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStatusCode {
    Ok,
    ParamInvalid,
    InternalError,
    ServiceResultBad,

    ViewBrowseRequestSizeOver,
    ViewBrowseResultEmpty,
    ViewNodeIdUnknownAllResults,
    ViewResultStatusCodeBad,
    ViewReferenceDataInvalid,
    ViewDirectionNotMatch,
    ViewNodeIdNull,
    ViewServerIndexNotZero,
    ViewReferenceTypeNull,
    ViewTypeDefinitionNull,
    ViewDisplayNameInvalid,
    ViewBrowseNameInvalid,
    ViewNodeClassNotInMask,
    ViewReferenceInvalid,
    ViewContinuationPointInvalid,

    BadRequestCancelledByClient,
    BadSubscriptionIdInvalid,
    BadMonitoredItemIdInvalid,
    BadNoSubscription,
    BadMessageNotAvailable,

    /// A wire-level service result came back bad; `0` holds the underlying status name.
    ServiceResultBadNamed(&'static str),
}

impl EdgeStatusCode {
    /// True for `Ok`, false for every error kind. `Message::Error` is only ever
    /// constructed for the false case.
    pub fn is_good(&self) -> bool {
        matches!(self, EdgeStatusCode::Ok)
    }

    /// The human-readable constant name, as spec §7 requires every error to carry.
    pub fn name(&self) -> String {
        match self {
            EdgeStatusCode::Ok => "STATUS_OK".to_string(),
            EdgeStatusCode::ParamInvalid => "STATUS_PARAM_INVALID".to_string(),
            EdgeStatusCode::InternalError => "STATUS_INTERNAL_ERROR".to_string(),
            EdgeStatusCode::ServiceResultBad => "STATUS_SERVICE_RESULT_BAD".to_string(),
            EdgeStatusCode::ViewBrowseRequestSizeOver => {
                "STATUS_VIEW_BROWSEREQUEST_SIZEOVER".to_string()
            }
            EdgeStatusCode::ViewBrowseResultEmpty => "STATUS_VIEW_BROWSERESULT_EMPTY".to_string(),
            EdgeStatusCode::ViewNodeIdUnknownAllResults => {
                "STATUS_VIEW_NODEID_UNKNOWN_ALL_RESULTS".to_string()
            }
            EdgeStatusCode::ViewResultStatusCodeBad => {
                "STATUS_VIEW_RESULT_STATUS_CODE_BAD".to_string()
            }
            EdgeStatusCode::ViewReferenceDataInvalid => {
                "STATUS_VIEW_REFERENCE_DATA_INVALID".to_string()
            }
            EdgeStatusCode::ViewDirectionNotMatch => "STATUS_VIEW_DIRECTION_NOT_MATCH".to_string(),
            EdgeStatusCode::ViewNodeIdNull => "STATUS_VIEW_NODEID_NULL".to_string(),
            EdgeStatusCode::ViewServerIndexNotZero => {
                "STATUS_VIEW_SERVERINDEX_NOT_ZERO".to_string()
            }
            EdgeStatusCode::ViewReferenceTypeNull => "STATUS_VIEW_REFERENCETYPE_NULL".to_string(),
            EdgeStatusCode::ViewTypeDefinitionNull => {
                "STATUS_VIEW_TYPEDEFINITION_NULL".to_string()
            }
            EdgeStatusCode::ViewDisplayNameInvalid => "STATUS_VIEW_DISPLAYNAME_INVALID".to_string(),
            EdgeStatusCode::ViewBrowseNameInvalid => "STATUS_VIEW_BROWSENAME_INVALID".to_string(),
            EdgeStatusCode::ViewNodeClassNotInMask => {
                "STATUS_VIEW_NODECLASS_NOT_IN_MASK".to_string()
            }
            EdgeStatusCode::ViewReferenceInvalid => "STATUS_VIEW_REFERENCE_INVALID".to_string(),
            EdgeStatusCode::ViewContinuationPointInvalid => {
                "STATUS_VIEW_CONTINUATIONPOINT_INVALID".to_string()
            }
            EdgeStatusCode::BadRequestCancelledByClient => {
                "BADREQUESTCANCELLEDBYCLIENT".to_string()
            }
            EdgeStatusCode::BadSubscriptionIdInvalid => "BADSUBSCRIPTIONIDINVALID".to_string(),
            EdgeStatusCode::BadMonitoredItemIdInvalid => "BADMONITOREDITEMIDINVALID".to_string(),
            EdgeStatusCode::BadNoSubscription => "BADNOSUBSCRIPTION".to_string(),
            EdgeStatusCode::BadMessageNotAvailable => "BADMESSAGENOTAVAILABLE".to_string(),
            EdgeStatusCode::ServiceResultBadNamed(name) => name.to_string(),
        }
    }
}

impl fmt::Display for EdgeStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
