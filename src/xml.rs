//! Owned XML trees on top of GDAL's CPL mini-XML.

use std::ffi::{c_void, CStr, CString};
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::str::FromStr;

use gdal_sys::{
    CPLAddXMLAttributeAndValue, CPLCreateXMLElementAndValue, CPLCreateXMLNode, CPLDestroyXMLNode,
    CPLGetXMLValue, CPLParseXMLString, CPLSerializeXMLTree, CPLXMLNode, CPLXMLNodeType, VSIFree,
};

use crate::errors::{Result, TilesError};

/// An XML document: a list of top-level sibling nodes owned by this value.
pub(crate) struct XmlDocument(NonNull<CPLXMLNode>);

impl XmlDocument {
    /// A document with a single, empty root element.
    pub(crate) fn new(root: &str) -> Result<XmlDocument> {
        let name = CString::new(root)?;
        let node =
            unsafe { CPLCreateXMLNode(ptr::null_mut(), CPLXMLNodeType::CXT_Element, name.as_ptr()) };
        NonNull::new(node)
            .map(XmlDocument)
            .ok_or_else(|| TilesError::Xml(format!("unable to create element <{root}>")))
    }

    /// The top-level element called `name`, skipping declarations and
    /// comments.
    pub(crate) fn root(&self, name: &str) -> Option<XmlElement<'_>> {
        siblings(self.0.as_ptr()).find(|element| element.name() == name)
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        unsafe { CPLDestroyXMLNode(self.0.as_ptr()) };
    }
}

impl FromStr for XmlDocument {
    type Err = TilesError;

    fn from_str(s: &str) -> Result<Self> {
        let text = CString::new(s)?;
        let node = unsafe { CPLParseXMLString(text.as_ptr()) };
        NonNull::new(node)
            .map(XmlDocument)
            .ok_or_else(|| TilesError::Xml("malformed XML document".to_string()))
    }
}

impl Display for XmlDocument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let serialized = unsafe { CPLSerializeXMLTree(self.0.as_ptr()) };
        if serialized.is_null() {
            return Err(std::fmt::Error);
        }
        let result = f.write_str(
            unsafe { CStr::from_ptr(serialized) }
                .to_string_lossy()
                .trim_end(),
        );
        unsafe { VSIFree(serialized as *mut c_void) };
        result
    }
}

impl Debug for XmlDocument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = self.to_string();
        if !f.alternate() {
            // Flatten the display string to fit on one line.
            s = s.replace(['\n', '\r', '\t'], "");
        }
        f.write_str(&s)
    }
}

/// An element inside an [`XmlDocument`], borrowed from it.
#[derive(Clone, Copy)]
pub(crate) struct XmlElement<'a> {
    node: NonNull<CPLXMLNode>,
    _document: PhantomData<&'a XmlDocument>,
}

impl<'a> XmlElement<'a> {
    fn new(node: *mut CPLXMLNode) -> Option<Self> {
        NonNull::new(node).map(|node| XmlElement {
            node,
            _document: PhantomData,
        })
    }

    pub(crate) fn name(&self) -> String {
        let value = unsafe { self.node.as_ref().pszValue };
        if value.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(value) }
            .to_string_lossy()
            .into_owned()
    }

    pub(crate) fn set_attribute(&self, name: &str, value: impl Display) -> Result<()> {
        let name = CString::new(name)?;
        let value = CString::new(value.to_string())?;
        unsafe { CPLAddXMLAttributeAndValue(self.node.as_ptr(), name.as_ptr(), value.as_ptr()) };
        Ok(())
    }

    /// Append an empty child element.
    pub(crate) fn add_element(&self, name: &str) -> Result<XmlElement<'a>> {
        let c_name = CString::new(name)?;
        let node = unsafe {
            CPLCreateXMLNode(
                self.node.as_ptr(),
                CPLXMLNodeType::CXT_Element,
                c_name.as_ptr(),
            )
        };
        XmlElement::new(node)
            .ok_or_else(|| TilesError::Xml(format!("unable to create element <{name}>")))
    }

    /// Append a child element holding `value` as text.
    pub(crate) fn add_text_element(&self, name: &str, value: impl Display) -> Result<XmlElement<'a>> {
        let c_name = CString::new(name)?;
        let c_value = CString::new(value.to_string())?;
        let node = unsafe {
            CPLCreateXMLElementAndValue(self.node.as_ptr(), c_name.as_ptr(), c_value.as_ptr())
        };
        XmlElement::new(node)
            .ok_or_else(|| TilesError::Xml(format!("unable to create element <{name}>")))
    }

    /// Text or attribute value at a dotted `path` below this element, e.g.
    /// `"BoundingBox.minx"`. An empty path reads this element's own text.
    pub(crate) fn value(&self, path: &str) -> Option<String> {
        let c_path = CString::new(path).ok()?;
        let value = unsafe { CPLGetXMLValue(self.node.as_ptr(), c_path.as_ptr(), ptr::null()) };
        if value.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(value) }.to_string_lossy().into_owned())
    }

    /// Like [`value`](Self::value), failing when the value is missing or does
    /// not parse.
    pub(crate) fn parse<T: FromStr>(&self, path: &str) -> Result<T> {
        let value = self
            .value(path)
            .ok_or_else(|| TilesError::Xml(format!("<{}> has no '{path}'", self.name())))?;
        value.trim().parse().map_err(|_| {
            TilesError::Xml(format!(
                "<{}> has an invalid '{path}': '{value}'",
                self.name()
            ))
        })
    }

    pub(crate) fn child(&self, name: &str) -> Option<XmlElement<'a>> {
        self.children(name).next()
    }

    /// Child elements called `name`, in document order.
    pub(crate) fn children<'n>(&self, name: &'n str) -> impl Iterator<Item = XmlElement<'a>> + 'n
    where
        'a: 'n,
    {
        let first = unsafe { self.node.as_ref().psChild };
        siblings(first).filter(move |element| element.name() == name)
    }
}

/// `node` and its following siblings that are elements.
fn siblings<'a>(node: *mut CPLXMLNode) -> impl Iterator<Item = XmlElement<'a>> {
    let mut next = node;
    std::iter::from_fn(move || {
        while let Some(current) = XmlElement::new(next) {
            let node = unsafe { current.node.as_ref() };
            next = node.psNext;
            if node.eType == CPLXMLNodeType::CXT_Element {
                return Some(current);
            }
        }
        None
    })
}
