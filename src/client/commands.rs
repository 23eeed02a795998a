//! Client command set
//!
//! A closed sum type of command variants replaces the verb-string
//! dispatch table: each variant owns its parse (a hand-rolled tokenizer
//! per verb, not a regex) and its RPC call, so an unhandled verb is a
//! compile error rather than a missing map entry.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::client::election;
use crate::client::workers::{run_reads, run_writes, ReadJob, WriteJob};
use crate::config::DfsConfig;
use crate::error::{Error, Result};
use crate::model::File;

#[derive(Debug, Clone)]
pub enum Command {
    Mkdir { user: String, path: String, make_parents: bool },
    Touch { user: String, path: String },
    Ls { user: String, path: String },
    Rm { user: String, path: String },
    Rmr { user: String, path: String },
    GetFile { user: String, path: String, local_path: String },
    GetChunks { user: String, path: String },
    Cat { user: String, path: String },
    Head { user: String, n: u64, path: String },
    Tail { user: String, n: u64, path: String },
    Cp { user: String, src: String, dst: String },
    Mv { user: String, src: String, dst: String },
    Count { user: String, path: String },
    Countr { user: String, path: String },
    Du { user: String, path: String },
    Chown { user: String, path: String, new_owner: String },
    Chgrp { user: String, path: String, new_group: String },
    Chmod { user: String, path: String, mode: String },
    PutFile { user: String, local_path: String, path: String },
    Mkfs { user: String },
    Groupadd { user: String, group: String },
    Useradd { user: String, name: String, password: String },
    Groupdel { user: String, group: String },
    Userdel { user: String, name: String },
    Passwd { user: String, target: String, new_password: String },
    Usermod { user: String, target: String, groups: Vec<String>, add: bool },
    Status { user: String },
    Quit,
}

/// Parses one input line into a [`Command`]. The verb is the first
/// whitespace-separated token; `InvalidSyntax` carries the expected
/// shape for that verb so the shell can echo it back.
pub fn parse_line(line: &str) -> Result<Command> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, rest)) = tokens.split_first() else {
        return Err(Error::CommandNotFound);
    };
    match *verb {
        "quit" => Ok(Command::Quit),
        "mkdir" => match rest {
            [user, path, flag] => Ok(Command::Mkdir { user: user.to_string(), path: path.to_string(), make_parents: *flag == "T" }),
            _ => Err(Error::InvalidSyntax("mkdir USER PATH {T|F}".into())),
        },
        "touch" => match rest {
            [user, path] => Ok(Command::Touch { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("touch USER PATH".into())),
        },
        "ls" => match rest {
            [user, path] => Ok(Command::Ls { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("ls USER PATH".into())),
        },
        "rm" => match rest {
            [user, path] => Ok(Command::Rm { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("rm USER PATH".into())),
        },
        "rmr" => match rest {
            [user, path] => Ok(Command::Rmr { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("rmr USER PATH".into())),
        },
        "get_file" => match rest {
            [user, path, local] => Ok(Command::GetFile { user: user.to_string(), path: path.to_string(), local_path: local.to_string() }),
            _ => Err(Error::InvalidSyntax("get_file USER PATH LOCALPATH".into())),
        },
        "get_chunks" => match rest {
            [user, path] => Ok(Command::GetChunks { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("get_chunks USER PATH".into())),
        },
        "cat" => match rest {
            [user, path] => Ok(Command::Cat { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("cat USER PATH".into())),
        },
        "head" => match rest {
            [user, n, path] => Ok(Command::Head {
                user: user.to_string(),
                n: n.parse().map_err(|_| Error::InvalidSyntax("head USER N PATH".into()))?,
                path: path.to_string(),
            }),
            _ => Err(Error::InvalidSyntax("head USER N PATH".into())),
        },
        "tail" => match rest {
            [user, n, path] => Ok(Command::Tail {
                user: user.to_string(),
                n: n.parse().map_err(|_| Error::InvalidSyntax("tail USER N PATH".into()))?,
                path: path.to_string(),
            }),
            _ => Err(Error::InvalidSyntax("tail USER N PATH".into())),
        },
        "cp" => match rest {
            [user, src, dst] => Ok(Command::Cp { user: user.to_string(), src: src.to_string(), dst: dst.to_string() }),
            _ => Err(Error::InvalidSyntax("cp USER SRC DST".into())),
        },
        "mv" => match rest {
            [user, src, dst] => Ok(Command::Mv { user: user.to_string(), src: src.to_string(), dst: dst.to_string() }),
            _ => Err(Error::InvalidSyntax("mv USER SRC DST".into())),
        },
        "count" => match rest {
            [user, path] => Ok(Command::Count { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("count USER PATH".into())),
        },
        "countr" => match rest {
            [user, path] => Ok(Command::Countr { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("countr USER PATH".into())),
        },
        "du" => match rest {
            [user, path] => Ok(Command::Du { user: user.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("du USER PATH".into())),
        },
        "chown" => match rest {
            [user, path, new_owner] => Ok(Command::Chown { user: user.to_string(), path: path.to_string(), new_owner: new_owner.to_string() }),
            _ => Err(Error::InvalidSyntax("chown USER PATH NEW_OWNER".into())),
        },
        "chgrp" => match rest {
            [user, path, new_group] => Ok(Command::Chgrp { user: user.to_string(), path: path.to_string(), new_group: new_group.to_string() }),
            _ => Err(Error::InvalidSyntax("chgrp USER PATH NEW_GROUP".into())),
        },
        "chmod" => match rest {
            [user, path, mode] => Ok(Command::Chmod { user: user.to_string(), path: path.to_string(), mode: mode.to_string() }),
            _ => Err(Error::InvalidSyntax("chmod USER PATH NNN".into())),
        },
        "put_file" => match rest {
            [user, local, path] => Ok(Command::PutFile { user: user.to_string(), local_path: local.to_string(), path: path.to_string() }),
            _ => Err(Error::InvalidSyntax("put_file USER LOCALPATH PATH".into())),
        },
        "mkfs" => match rest {
            [user] => Ok(Command::Mkfs { user: user.to_string() }),
            _ => Err(Error::InvalidSyntax("mkfs USER".into())),
        },
        "groupadd" => match rest {
            [user, group] => Ok(Command::Groupadd { user: user.to_string(), group: group.to_string() }),
            _ => Err(Error::InvalidSyntax("groupadd USER GROUP".into())),
        },
        "useradd" => match rest {
            [user, name, password] => Ok(Command::Useradd { user: user.to_string(), name: name.to_string(), password: password.to_string() }),
            _ => Err(Error::InvalidSyntax("useradd USER NAME PASSWORD".into())),
        },
        "groupdel" => match rest {
            [user, group] => Ok(Command::Groupdel { user: user.to_string(), group: group.to_string() }),
            _ => Err(Error::InvalidSyntax("groupdel USER GROUP".into())),
        },
        "userdel" => match rest {
            [user, name] => Ok(Command::Userdel { user: user.to_string(), name: name.to_string() }),
            _ => Err(Error::InvalidSyntax("userdel USER NAME".into())),
        },
        "passwd" => match rest {
            [user, target, newpass] => Ok(Command::Passwd { user: user.to_string(), target: target.to_string(), new_password: newpass.to_string() }),
            _ => Err(Error::InvalidSyntax("passwd USER TARGET NEWPASS".into())),
        },
        "usermod" => {
            if rest.len() < 3 {
                return Err(Error::InvalidSyntax("usermod USER TARGET GROUP{ GROUP}+ {+|-}".into()));
            }
            let (head, tail) = rest.split_at(2);
            let Some((sign, groups)) = tail.split_last() else {
                return Err(Error::InvalidSyntax("usermod USER TARGET GROUP{ GROUP}+ {+|-}".into()));
            };
            let add = match *sign {
                "+" => true,
                "-" => false,
                _ => return Err(Error::InvalidSyntax("usermod USER TARGET GROUP{ GROUP}+ {+|-}".into())),
            };
            if groups.is_empty() {
                return Err(Error::InvalidSyntax("usermod USER TARGET GROUP{ GROUP}+ {+|-}".into()));
            }
            Ok(Command::Usermod {
                user: head[0].to_string(),
                target: head[1].to_string(),
                groups: groups.iter().map(|s| s.to_string()).collect(),
                add,
            })
        }
        "status" => match rest {
            [user] => Ok(Command::Status { user: user.to_string() }),
            _ => Err(Error::InvalidSyntax("status USER".into())),
        },
        _ => Err(Error::CommandNotFound),
    }
}

/// Everything needed to reach the cluster: resolved master address, the
/// invoking user's password (prompted once per shell session), and the
/// configuration governing chunk size and worker concurrency.
pub struct Session {
    pub config: DfsConfig,
    pub http: reqwest::Client,
    master: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    user: &'a str,
    password: Option<&'a str>,
}

#[derive(Deserialize)]
struct RpcFaultBody {
    kind: String,
    message: String,
}

impl Session {
    pub async fn connect(config: DfsConfig) -> Result<Self> {
        let http = reqwest::Client::new();
        let master = election::elect_master(&config, &http).await?;
        Ok(Self { config, http, master })
    }

    fn rpc_url(&self, verb: &str) -> String {
        format!("http://{}/rpc/{}", self.master, verb)
    }

    async fn call<B: Serialize, R: for<'de> Deserialize<'de>>(&self, verb: &str, body: &B) -> Result<R> {
        let resp = self.http.post(self.rpc_url(verb)).json(body).send().await?;
        if resp.status().is_success() {
            Ok(resp.json().await?)
        } else {
            let fault: RpcFaultBody = resp.json().await?;
            Err(rpc_fault_to_error(&fault))
        }
    }

    pub async fn execute(&self, command: Command, password: Option<&str>) -> Result<String> {
        match command {
            Command::Quit => Ok(String::new()),
            Command::Mkdir { user, path, make_parents } => {
                #[derive(Serialize)]
                struct Req<'a> {
                    #[serde(flatten)]
                    who: Credentials<'a>,
                    path: String,
                    make_parents: bool,
                }
                self.call::<_, ()>("mkdir", &Req { who: Credentials { user: &user, password }, path, make_parents }).await?;
                Ok(String::new())
            }
            Command::Touch { user, path } => {
                self.call::<_, File>("touch", &path_request(&user, password, &path)).await?;
                Ok(String::new())
            }
            Command::Ls { user, path } => {
                let entries: Vec<(String, bool)> = self.call("ls", &path_request(&user, password, &path)).await?;
                Ok(entries.into_iter().map(|(name, is_dir)| if is_dir { format!("{name}/") } else { name }).collect::<Vec<_>>().join("\n"))
            }
            Command::Rm { user, path } => {
                self.call::<_, ()>("rm", &path_request(&user, password, &path)).await?;
                Ok(String::new())
            }
            Command::Rmr { user, path } => {
                self.call::<_, ()>("rmr", &path_request(&user, password, &path)).await?;
                Ok(String::new())
            }
            Command::GetChunks { user, path } => {
                let file: File = self.call("get_chunks", &path_request(&user, password, &path)).await?;
                Ok(format!("{:#?}", file))
            }
            Command::Cp { user, src, dst } => {
                self.call::<_, Vec<String>>("cp", &mv_request(&user, password, &src, &dst)).await?;
                Ok(String::new())
            }
            Command::Mv { user, src, dst } => {
                self.call::<_, ()>("mv", &mv_request(&user, password, &src, &dst)).await?;
                Ok(String::new())
            }
            Command::Count { user, path } => Ok(self.call::<_, u64>("count", &path_request(&user, password, &path)).await?.to_string()),
            Command::Countr { user, path } => Ok(self.call::<_, u64>("countr", &path_request(&user, password, &path)).await?.to_string()),
            Command::Du { user, path } => Ok(self.call::<_, u64>("du", &path_request(&user, password, &path)).await?.to_string()),
            Command::Chown { user, path, new_owner } => {
                #[derive(Serialize)]
                struct Req<'a> {
                    #[serde(flatten)]
                    who: Credentials<'a>,
                    path: String,
                    new_owner: String,
                }
                self.call::<_, ()>("chown", &Req { who: Credentials { user: &user, password }, path, new_owner }).await?;
                Ok(String::new())
            }
            Command::Chgrp { user, path, new_group } => {
                #[derive(Serialize)]
                struct Req<'a> {
                    #[serde(flatten)]
                    who: Credentials<'a>,
                    path: String,
                    new_group: String,
                }
                self.call::<_, ()>("chgrp", &Req { who: Credentials { user: &user, password }, path, new_group }).await?;
                Ok(String::new())
            }
            Command::Chmod { user, path, mode } => {
                #[derive(Serialize)]
                struct Req<'a> {
                    #[serde(flatten)]
                    who: Credentials<'a>,
                    path: String,
                    mode: String,
                }
                self.call::<_, ()>("chmod", &Req { who: Credentials { user: &user, password }, path, mode }).await?;
                Ok(String::new())
            }
            Command::Mkfs { user } => {
                self.call::<_, ()>("mkfs", &Credentials { user: &user, password }).await?;
                Ok(String::new())
            }
            Command::Groupadd { user, group } => {
                self.call::<_, ()>("groupadd", &name_request(&user, password, &group)).await?;
                Ok(String::new())
            }
            Command::Useradd { user, name, password: new_password } => {
                #[derive(Serialize)]
                struct Req<'a> {
                    #[serde(flatten)]
                    who: Credentials<'a>,
                    target: String,
                    new_password: String,
                }
                self.call::<_, ()>("useradd", &Req { who: Credentials { user: &user, password }, target: name, new_password }).await?;
                Ok(String::new())
            }
            Command::Groupdel { user, group } => {
                self.call::<_, ()>("groupdel", &name_request(&user, password, &group)).await?;
                Ok(String::new())
            }
            Command::Userdel { user, name } => {
                self.call::<_, ()>("userdel", &name_request(&user, password, &name)).await?;
                Ok(String::new())
            }
            Command::Passwd { user, target, new_password } => {
                #[derive(Serialize)]
                struct Req<'a> {
                    #[serde(flatten)]
                    who: Credentials<'a>,
                    target: String,
                    new_password: String,
                }
                self.call::<_, ()>("passwd", &Req { who: Credentials { user: &user, password }, target, new_password }).await?;
                Ok(String::new())
            }
            Command::Usermod { user, target, groups, add } => {
                #[derive(Serialize)]
                struct Req<'a> {
                    #[serde(flatten)]
                    who: Credentials<'a>,
                    target: String,
                    groups: Vec<String>,
                    add: bool,
                }
                self.call::<_, ()>("usermod", &Req { who: Credentials { user: &user, password }, target, groups, add }).await?;
                Ok(String::new())
            }
            Command::Status { user } => {
                #[derive(Deserialize, Debug)]
                struct Report {
                    is_master: bool,
                    live_storage_nodes: Vec<String>,
                    batches_fanned_out: u64,
                }
                let report: Report = self.call("status", &Credentials { user: &user, password }).await?;
                Ok(format!("{:#?}", report))
            }
            Command::PutFile { user, local_path, path } => self.put_file(&user, password, &local_path, &path).await,
            Command::GetFile { user, path, local_path } => {
                let bytes = self.read_whole_file(&user, password, &path).await?;
                tokio::fs::write(&local_path, &bytes).await?;
                Ok(String::new())
            }
            Command::Cat { user, path } => {
                let bytes = self.read_whole_file(&user, password, &path).await?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Command::Head { user, n, path } => {
                let file = self.get_file_meta(&user, password, &path).await?;
                let chunk_size = self.config.max_chunk_size.max(1);
                let end_idx = if n == 0 { 0 } else { ((n - 1) / chunk_size + 1) as usize };
                let bytes = self.read_chunks(&file, 0, end_idx).await?;
                let n = (n as usize).min(bytes.len());
                Ok(String::from_utf8_lossy(&bytes[..n]).into_owned())
            }
            Command::Tail { user, n, path } => {
                let file = self.get_file_meta(&user, password, &path).await?;
                let chunk_size = self.config.max_chunk_size.max(1);
                let start_idx = if n >= file.size { 0 } else { ((file.size - n) / chunk_size) as usize };
                let bytes = self.read_chunks(&file, start_idx, file.chunk_count()).await?;
                let n = (n as usize).min(bytes.len());
                Ok(String::from_utf8_lossy(&bytes[bytes.len() - n..]).into_owned())
            }
        }
    }

    async fn get_file_meta(&self, user: &str, password: Option<&str>, path: &str) -> Result<File> {
        self.call("get_chunks", &path_request(user, password, path)).await
    }

    /// Reads the chunks `[start_idx, end_idx)` of `file`'s ordered chunk
    /// list and assembles them in order. Used directly by `head`/`tail`
    /// so they only ever fetch the chunks their byte range actually
    /// touches, not the whole file.
    async fn read_chunks(&self, file: &File, start_idx: usize, end_idx: usize) -> Result<Vec<u8>> {
        let names = file.ordered_chunk_names();
        let end_idx = end_idx.min(names.len());
        let start_idx = start_idx.min(end_idx);
        let mut jobs = Vec::new();
        for (sequence, name) in names[start_idx..end_idx].iter().enumerate() {
            let primary = file.chunks_bkp.get(name).map(|k| crate::model::decode_sn_key(k)).ok_or(Error::GetFile)?;
            let mut nodes = vec![primary];
            nodes.extend(file.replicas.get(name).cloned().unwrap_or_default());
            jobs.push(ReadJob { nodes, chunk_name: name.clone(), sequence });
        }
        run_reads(self.http.clone(), jobs, self.config.resolved_thread_concurrency()).await
    }

    async fn read_whole_file(&self, user: &str, password: Option<&str>, path: &str) -> Result<Vec<u8>> {
        let file = self.get_file_meta(user, password, path).await?;
        let chunk_count = file.chunk_count();
        self.read_chunks(&file, 0, chunk_count).await
    }

    async fn put_file(&self, user: &str, password: Option<&str>, local_path: &str, path: &str) -> Result<String> {
        let bytes = tokio::fs::read(PathBuf::from(local_path)).await?;
        #[derive(Serialize)]
        struct Req<'a> {
            #[serde(flatten)]
            who: Credentials<'a>,
            path: String,
            size: u64,
        }
        #[derive(Deserialize)]
        struct PlacementDto {
            primary: String,
            secondaries: Vec<String>,
        }
        let (file, placements): (File, Vec<PlacementDto>) =
            self.call("put_file", &Req { who: Credentials { user, password }, path: path.to_string(), size: bytes.len() as u64 }).await?;
        let chunk_size = self.config.max_chunk_size;
        let mut jobs = Vec::new();
        for (sequence, name) in file.ordered_chunk_names().into_iter().enumerate() {
            let start = sequence * chunk_size as usize;
            let end = (start + chunk_size as usize).min(bytes.len());
            let placement = placements.get(sequence).ok_or_else(|| Error::Internal("placement/chunk count mismatch".into()))?;
            jobs.push(WriteJob {
                primary: placement.primary.clone(),
                chunk_name: name,
                payload: bytes[start..end].to_vec(),
                secondaries: placement.secondaries.clone(),
            });
        }
        run_writes(self.http.clone(), jobs, self.config.resolved_thread_concurrency()).await;
        Ok(String::new())
    }
}

fn path_request(user: &str, password: Option<&str>, path: &str) -> impl Serialize {
    #[derive(Serialize)]
    struct Req<'a> {
        #[serde(flatten)]
        who: Credentials<'a>,
        path: String,
    }
    Req { who: Credentials { user, password }, path: path.to_string() }
}

fn mv_request(user: &str, password: Option<&str>, src: &str, dst: &str) -> impl Serialize {
    #[derive(Serialize)]
    struct Req<'a> {
        #[serde(flatten)]
        who: Credentials<'a>,
        src: String,
        dst: String,
    }
    Req { who: Credentials { user, password }, src: src.to_string(), dst: dst.to_string() }
}

fn name_request(user: &str, password: Option<&str>, name: &str) -> impl Serialize {
    #[derive(Serialize)]
    struct Req<'a> {
        #[serde(flatten)]
        who: Credentials<'a>,
        name: String,
    }
    Req { who: Credentials { user, password }, name: name.to_string() }
}

fn rpc_fault_to_error(fault: &RpcFaultBody) -> Error {
    match fault.kind.as_str() {
        "NotFound" => Error::NotFound(fault.message.clone()),
        "AlreadyExists" => Error::AlreadyExists,
        "AlreadyExistsDirectory" => Error::AlreadyExistsDirectory,
        "NotParent" => Error::NotParent(fault.message.clone()),
        "NotDirectory" => Error::NotDirectory(fault.message.clone()),
        "NotEmpty" => Error::NotEmpty,
        "RootDirectory" => Error::RootDirectory,
        "ItselfSubdir" => Error::ItselfSubdir,
        "AccessDenied" => Error::AccessDenied(fault.message.clone()),
        "AccessDeniedAtLeastOne" => Error::AccessDeniedAtLeastOne(fault.message.clone()),
        "RootNecessary" => Error::RootNecessary,
        "InvalidMod" => Error::InvalidMod(fault.message.clone()),
        "UserNotFound" => Error::UserNotFound(fault.message.clone()),
        "GroupNotFound" => Error::GroupNotFound(fault.message.clone()),
        "UserAlreadyExists" => Error::UserAlreadyExists,
        "GroupAlreadyExists" => Error::GroupAlreadyExists,
        "MainUserGroup" => Error::MainUserGroup(fault.message.clone()),
        "GetFile" => Error::GetFile,
        _ => Error::Internal(fault.message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mkdir_with_parents_flag() {
        let cmd = parse_line("mkdir root /a/b/c T").unwrap();
        assert!(matches!(cmd, Command::Mkdir { make_parents: true, .. }));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(matches!(parse_line("mkdir root"), Err(Error::InvalidSyntax(_))));
    }

    #[test]
    fn unknown_verb_is_command_not_found() {
        assert!(matches!(parse_line("frobnicate root /x"), Err(Error::CommandNotFound)));
    }

    #[test]
    fn parses_usermod_add_and_remove() {
        let added = parse_line("usermod root alice devs qa +").unwrap();
        match added {
            Command::Usermod { groups, add, .. } => {
                assert_eq!(groups, vec!["devs".to_string(), "qa".to_string()]);
                assert!(add);
            }
            _ => panic!("expected Usermod"),
        }
        let removed = parse_line("usermod root alice devs -").unwrap();
        assert!(matches!(removed, Command::Usermod { add: false, .. }));
    }

    #[test]
    fn quit_has_no_arguments() {
        assert!(matches!(parse_line("quit").unwrap(), Command::Quit));
    }
}
