//! Which page the client displays, as an explicit state machine.
//!
//! Every page is a `View` carrying everything it needs to render, and the only
//! way to move between pages is to `apply` a `Transition`. Transitions that
//! make no sense from the current page, or that need a logged-in user, are
//! refused and leave the router untouched.

use crate::{
    api::{CommentId, CommunityId, PostId, UserId},
    Order,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ProfileTab {
    #[default]
    Posts,
    Communities,
    Comments,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum View {
    /// Login and registration forms
    Welcome,
    Home {
        order: Order,
    },
    Community {
        id: CommunityId,
        order: Order,
    },
    Post {
        id: PostId,
    },
    Search {
        query: String,
        order: Order,
    },
    Profile {
        user: UserId,
        tab: ProfileTab,
    },
    /// Post form, empty or prefilled with the post being edited
    PostForm {
        edit: Option<PostId>,
    },
    CommunityForm {
        edit: Option<CommunityId>,
    },
    /// Comment form for a reply to `parent` (or to the post itself)
    CommentForm {
        post: PostId,
        parent: Option<CommentId>,
        edit: Option<CommentId>,
    },
}

impl View {
    /// The community list is hidden on the welcome page only
    pub fn shows_navbar(&self) -> bool {
        !matches!(self, View::Welcome)
    }

    fn order_mut(&mut self) -> Option<&mut Order> {
        match self {
            View::Home { order } | View::Community { order, .. } | View::Search { order, .. } => {
                Some(order)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    LoggedIn(UserId),
    LoggedOut,
    Registered,
    ContinueAsGuest,
    GoWelcome,
    GoHome,
    OpenCommunity(CommunityId),
    /// Opening a post also counts as a view, which the caller reports to the server
    OpenPost(PostId),
    Search(String),
    SetOrder(Order),
    OpenProfile,
    SelectTab(ProfileTab),
    NewPost,
    EditPost(PostId),
    NewCommunity,
    EditCommunity(CommunityId),
    /// Reply to the currently displayed post, or to one of its comments
    Reply(Option<CommentId>),
    EditComment { post: PostId, comment: CommentId },
    PostSaved(PostId),
    CommunitySaved(CommunityId),
    CommentSaved,
    Cancel,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("this page requires being logged in")]
    LoginRequired,

    #[error("cannot apply {transition:?} while displaying {view:?}")]
    InvalidTransition { view: View, transition: Transition },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Router {
    view: View,
    user: Option<UserId>,
    /// Where `Cancel` goes back to when a form is open
    before_form: Option<View>,
}

impl Router {
    /// A returning user lands on the home page, anyone else on the welcome page
    pub fn new(user: Option<UserId>) -> Router {
        let view = match user {
            Some(_) => View::Home {
                order: Order::default(),
            },
            None => View::Welcome,
        };
        Router {
            view,
            user,
            before_form: None,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn user(&self) -> Option<UserId> {
        self.user
    }

    pub fn apply(&mut self, transition: Transition) -> Result<&View, RouteError> {
        let next = self.next(&transition)?;
        tracing::debug!(from = ?self.view, to = ?next, ?transition, "changing view");
        match transition {
            Transition::LoggedIn(user) => self.user = Some(user),
            Transition::LoggedOut => self.user = None,
            _ => (),
        }
        let is_form = matches!(
            next,
            View::PostForm { .. } | View::CommunityForm { .. } | View::CommentForm { .. }
        );
        let prev = std::mem::replace(&mut self.view, next);
        self.before_form = match (is_form, self.before_form.take()) {
            (true, Some(origin)) => Some(origin),
            (true, None) => Some(prev),
            (false, _) => None,
        };
        Ok(&self.view)
    }

    fn logged_in(&self) -> Result<UserId, RouteError> {
        self.user.ok_or(RouteError::LoginRequired)
    }

    fn next(&self, transition: &Transition) -> Result<View, RouteError> {
        let invalid = || RouteError::InvalidTransition {
            view: self.view.clone(),
            transition: transition.clone(),
        };
        let home = View::Home {
            order: Order::default(),
        };
        Ok(match (&self.view, transition) {
            (View::Welcome, Transition::LoggedIn(_)) => home,
            (View::Welcome, Transition::ContinueAsGuest) => home,
            (View::Welcome, Transition::Registered) => View::Welcome,
            (View::Welcome, _) if self.user.is_none() => return Err(invalid()),

            (_, Transition::LoggedOut) => View::Welcome,
            (_, Transition::GoWelcome) => View::Welcome,
            (_, Transition::GoHome) => home,
            (_, Transition::OpenCommunity(id)) => View::Community {
                id: *id,
                order: Order::default(),
            },
            (_, Transition::OpenPost(id)) => View::Post { id: *id },
            (_, Transition::Search(query)) => View::Search {
                query: query.clone(),
                order: Order::default(),
            },
            (_, Transition::OpenProfile) => View::Profile {
                user: self.logged_in()?,
                tab: ProfileTab::default(),
            },
            (_, Transition::NewPost) => {
                self.logged_in()?;
                View::PostForm { edit: None }
            }
            (_, Transition::EditPost(id)) => {
                self.logged_in()?;
                View::PostForm { edit: Some(*id) }
            }
            (_, Transition::NewCommunity) => {
                self.logged_in()?;
                View::CommunityForm { edit: None }
            }
            (_, Transition::EditCommunity(id)) => {
                self.logged_in()?;
                View::CommunityForm { edit: Some(*id) }
            }
            (_, Transition::EditComment { post, comment }) => {
                self.logged_in()?;
                View::CommentForm {
                    post: *post,
                    parent: None,
                    edit: Some(*comment),
                }
            }

            // Guests may comment
            (View::Post { id }, Transition::Reply(parent)) => View::CommentForm {
                post: *id,
                parent: *parent,
                edit: None,
            },

            (view, Transition::SetOrder(order)) => {
                let mut view = view.clone();
                *view.order_mut().ok_or_else(invalid)? = *order;
                view
            }
            (View::Profile { user, .. }, Transition::SelectTab(tab)) => View::Profile {
                user: *user,
                tab: *tab,
            },

            (View::PostForm { .. }, Transition::PostSaved(_)) => home,
            (View::CommunityForm { .. }, Transition::CommunitySaved(id)) => View::Community {
                id: *id,
                order: Order::default(),
            },
            (View::CommentForm { post, .. }, Transition::CommentSaved) => {
                View::Post { id: *post }
            }
            (
                View::PostForm { .. } | View::CommunityForm { .. } | View::CommentForm { .. },
                Transition::Cancel,
            ) => self.before_form.clone().unwrap_or(home),

            _ => return Err(invalid()),
        })
    }
}
