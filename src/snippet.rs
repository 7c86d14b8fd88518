//! Shader source snippets hooked into generated programs.
//!
//! A snippet is an immutable fragment of shader source attached to one
//! of the well-known hook points. Snippets are identity-compared: two
//! pipelines only share generated programs when they reference the
//! same snippet objects in the same order.

use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Hook points a snippet can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnippetHook {
    // Pipeline vertex hooks
    Vertex,
    VertexTransform,
    VertexGlobals,
    PointSize,
    // Pipeline fragment hooks
    Fragment,
    FragmentGlobals,
    // Per-layer hooks
    TextureCoordTransform,
    LayerFragment,
    TextureLookup,
}

impl SnippetHook {
    /// Whether this hook lands in the vertex stage.
    #[must_use]
    pub fn is_vertex(self) -> bool {
        matches!(
            self,
            SnippetHook::Vertex
                | SnippetHook::VertexTransform
                | SnippetHook::VertexGlobals
                | SnippetHook::PointSize
                | SnippetHook::TextureCoordTransform
        )
    }
}

#[derive(Debug)]
struct SnippetData {
    hook: SnippetHook,
    declarations: String,
    pre: String,
    replace: Option<String>,
    post: String,
}

/// A reference-counted, immutable shader snippet.
#[derive(Debug, Clone)]
pub struct Snippet(Rc<SnippetData>);

impl Snippet {
    #[must_use]
    pub fn new(hook: SnippetHook, declarations: &str, post: &str) -> Self {
        Snippet(Rc::new(SnippetData {
            hook,
            declarations: declarations.to_owned(),
            pre: String::new(),
            replace: None,
            post: post.to_owned(),
        }))
    }

    /// Full constructor with pre/replace sections.
    #[must_use]
    pub fn with_sections(
        hook: SnippetHook,
        declarations: &str,
        pre: &str,
        replace: Option<&str>,
        post: &str,
    ) -> Self {
        Snippet(Rc::new(SnippetData {
            hook,
            declarations: declarations.to_owned(),
            pre: pre.to_owned(),
            replace: replace.map(str::to_owned),
            post: post.to_owned(),
        }))
    }

    #[must_use]
    pub fn hook(&self) -> SnippetHook {
        self.0.hook
    }

    #[must_use]
    pub fn declarations(&self) -> &str {
        &self.0.declarations
    }

    #[must_use]
    pub fn pre(&self) -> &str {
        &self.0.pre
    }

    #[must_use]
    pub fn replace(&self) -> Option<&str> {
        self.0.replace.as_deref()
    }

    #[must_use]
    pub fn post(&self) -> &str {
        &self.0.post
    }
}

impl PartialEq for Snippet {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Snippet {}

impl Hash for Snippet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}
